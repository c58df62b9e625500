use crate::migration::Migration;

/// Human-facing output and confirmation for a migration run.
///
/// The core never prints; everything a user should see goes through this
/// trait, supplied by the caller (a CLI, typically). Diagnostic logging uses
/// the `log` facade separately.
pub trait ProgressReporter {
    fn info(&self, text: &str);
    fn warn(&self, text: &str);
    fn error(&self, text: &str);
    fn show_plan(&self, migrations: &[Migration]);
    /// Asks before executing one statement. Returning `false` skips that
    /// statement only; the run continues with the next one.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Discards all output and confirms every prompt.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn info(&self, _text: &str) {}
    fn warn(&self, _text: &str) {}
    fn error(&self, _text: &str) {}
    fn show_plan(&self, _migrations: &[Migration]) {}
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Routes reporter output to the `log` facade and confirms every prompt.
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn info(&self, text: &str) {
        log::info!("{}", text);
    }

    fn warn(&self, text: &str) {
        log::warn!("{}", text);
    }

    fn error(&self, text: &str) {
        log::error!("{}", text);
    }

    fn show_plan(&self, migrations: &[Migration]) {
        for migration in migrations {
            log::info!("* {}", migration.describe());
        }
    }

    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}
