/// How much confirmation an interactive load asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum InteractiveLevel {
    /// Never prompt.
    #[default]
    None,
    /// Confirm before loading the target.
    Load,
    /// Confirm before loading and again before starting each module.
    LoadAndStart,
}

/// A user's answer to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Yes,
    No,
    /// Stop the whole operation, not just this question.
    Abort,
}

/// The prompt capability handed to interactive loads.
///
/// Calls block until the user answers; none of them re-enter the manager.
pub trait UserInteraction {
    /// Ask permission to take an action.
    fn approve(&self, prompt: &str) -> Response;

    /// Offer the user a chance to stop an action that otherwise proceeds.
    fn veto(&self, prompt: &str) -> Response;

    /// Request a line of input.
    fn input(&self, prompt: &str) -> Option<String>;
}

/// The non-interactive default: denies approval, grants vetoes, returns
/// no input.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentInteraction;

impl UserInteraction for SilentInteraction {
    fn approve(&self, _prompt: &str) -> Response {
        Response::No
    }

    fn veto(&self, _prompt: &str) -> Response {
        Response::Yes
    }

    fn input(&self, _prompt: &str) -> Option<String> {
        None
    }
}
