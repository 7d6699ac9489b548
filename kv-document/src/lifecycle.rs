use std::sync::Arc;

use crate::Document;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Validation,
    Save,
    Create,
    Update,
    Destroy,
    Touch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timing {
    Before,
    After,
}

/// Returned by hooks; `Abort` vetoes the running operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookResult {
    Continue,
    Abort,
}

pub type Hook = Arc<dyn Fn(&mut Document) -> HookResult + Send + Sync>;
pub type Validator = Arc<dyn Fn(&Document) -> Result<(), String> + Send + Sync>;

/// Ordered hooks and validators of one model.
#[derive(Clone, Default)]
pub struct Lifecycle {
    hooks: Vec<(Event, Timing, Hook)>,
    validators: Vec<Validator>,
}

impl Lifecycle {
    pub(crate) fn add_hook(&mut self, event: Event, timing: Timing, hook: Hook) {
        self.hooks.push((event, timing, hook));
    }

    pub(crate) fn add_validator(&mut self, validator: Validator) {
        self.validators.push(validator);
    }

    /// Runs `before` hooks in declaration order, stopping at the first abort.
    pub fn run_before(&self, event: Event, document: &mut Document) -> HookResult {
        for (e, timing, hook) in &self.hooks {
            if *e == event && *timing == Timing::Before && hook(document) == HookResult::Abort {
                log::debug!("{:?} aborted by a before hook", event);
                return HookResult::Abort;
            }
        }
        HookResult::Continue
    }

    pub fn run_after(&self, event: Event, document: &mut Document) {
        for (e, timing, hook) in &self.hooks {
            if *e == event && *timing == Timing::After {
                let _ = hook(document);
            }
        }
    }

    /// Runs the validation phase and returns the collected error messages.
    pub(crate) fn validate(&self, document: &mut Document) -> Result<Vec<String>, ()> {
        if self.run_before(Event::Validation, document) == HookResult::Abort {
            return Err(());
        }
        let errors = self
            .validators
            .iter()
            .filter_map(|validator| validator(document).err())
            .collect();
        self.run_after(Event::Validation, document);
        Ok(errors)
    }
}
