//! Terminal output for the wheelsmith CLI
//!
//! Uses `cliclack` for prompts and step output in interactive terminals and
//! falls back to plain, prefix-tagged lines in CI or when stdout is piped.
//!
//! ```rust,ignore
//! use wheelsmith::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Building demo 1.0...");
//! spinner.stop("Built demo-1.0-py3-none-any.whl");
//! ui::step_warn_hint(&ctx, "Registry unavailable", "Artifact was not published");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, key_value_status, outro_success, outro_warn, remark, section, step_error,
    step_error_detail, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{ItemProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, WheelsmithTheme};
