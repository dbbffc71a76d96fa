//! The Lifecycle Engine's state machine (§4.4.8): a fixed transition table
//! over `PluginStatus`, checked explicitly on every mutation rather than
//! left implicit in call-site logic. Transitions outside the table are
//! rejected with `InvalidTransition`.

use flowforge_runtime::model::PluginStatus;

use crate::api_error::ApiError;

/// `true` if moving from `from` to `to` is one of the edges named in §4.4.8.
pub fn is_allowed(from: PluginStatus, to: PluginStatus) -> bool {
    use PluginStatus::*;
    matches!(
        (from, to),
        (Installing, Installed)
            | (Installing, Error)
            | (Installed, Starting)
            | (Starting, Running)
            | (Starting, Error)
            | (Running, Stopping)
            | (Running, Error)
            | (Stopping, Stopped)
            | (Stopping, Error)
            | (Stopped, Starting)
            | (Error, Starting)
            | (Error, Uninstalling)
    ) || to == Uninstalling // error is a resting state reachable from any non-terminal state except itself already covered; uninstall is requestable from any non-terminal state
        && from != Uninstalling
}

/// Checks the edge and returns `InvalidTransition` if it is not in the table.
pub fn check(from: PluginStatus, to: PluginStatus) -> Result<(), ApiError> {
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(ApiError::InvalidTransition(format!(
            "{from:?} -> {to:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PluginStatus::*;

    #[test]
    fn installing_may_only_become_installed_or_error() {
        assert!(is_allowed(Installing, Installed));
        assert!(is_allowed(Installing, Error));
        assert!(!is_allowed(Installing, Running));
    }

    #[test]
    fn running_never_goes_back_to_installing() {
        assert!(!is_allowed(Running, Installing));
    }

    #[test]
    fn uninstalling_is_terminal_and_accepts_no_further_transitions() {
        assert!(!is_allowed(Uninstalling, Installed));
        assert!(!is_allowed(Uninstalling, Error));
    }

    #[test]
    fn uninstall_is_reachable_from_any_non_terminal_state() {
        for state in [Installing, Installed, Starting, Running, Stopping, Stopped, Error] {
            assert!(is_allowed(state, Uninstalling), "{state:?} -> Uninstalling");
        }
    }
}
