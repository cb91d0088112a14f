use std::fmt;
use std::time::Duration;

use rusqlite::DatabaseName;
use serde::Serialize;

use crate::error::DbError;

/// Pages copied by the first step, before the caller has seen any progress.
pub const PROBE_STEP_PAGES: i32 = 16;
/// Pages copied per step after the probe unless overridden.
pub const DEFAULT_STEP_PAGES: i32 = 100;
/// Pause before retrying a step the engine reported busy or locked.
pub const BUSY_BACKOFF: Duration = Duration::from_millis(10);

/// Page counts reported after each backup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupProgress {
    pub total_pages: u32,
    pub remaining_pages: u32,
}

impl BackupProgress {
    pub(crate) fn from_engine(progress: rusqlite::backup::Progress) -> Self {
        Self {
            total_pages: u32::try_from(progress.pagecount).unwrap_or_default(),
            remaining_pages: u32::try_from(progress.remaining).unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn copied_pages(&self) -> u32 {
        self.total_pages.saturating_sub(self.remaining_pages)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining_pages == 0
    }
}

type ProgressFn<'a> = Box<dyn FnMut(&BackupProgress) -> Option<i64> + 'a>;

/// Options for [`Connection::backup_to`](crate::sqlite::connection::Connection::backup_to).
///
/// The progress callback runs after every step. Returning `Some(n)` sets the
/// step size from then on; `0` copies everything left in one step.
pub struct BackupOptions<'a> {
    pub(crate) attachment: String,
    pub(crate) step_pages: Option<u32>,
    pub(crate) on_progress: Option<ProgressFn<'a>>,
}

impl Default for BackupOptions<'_> {
    fn default() -> Self {
        Self {
            attachment: "main".into(),
            step_pages: None,
            on_progress: None,
        }
    }
}

impl<'a> BackupOptions<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema to copy: `main`, `temp` or an attached database name.
    #[must_use]
    pub fn attachment(mut self, name: impl Into<String>) -> Self {
        self.attachment = name.into();
        self
    }

    /// Step size used after the probe step.
    #[must_use]
    pub fn step_pages(mut self, pages: u32) -> Self {
        self.step_pages = Some(pages);
        self
    }

    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&BackupProgress) -> Option<i64> + 'a,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn attachment_name(&self) -> &str {
        &self.attachment
    }
}

impl fmt::Debug for BackupOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupOptions")
            .field("attachment", &self.attachment)
            .field("step_pages", &self.step_pages)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Page count handed to the engine for each step. `-1` means "all remaining".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StepPlan {
    next: i32,
    rate: i32,
}

impl StepPlan {
    pub(crate) fn new(step_pages: Option<u32>) -> Result<Self, DbError> {
        let rate = match step_pages {
            None => DEFAULT_STEP_PAGES,
            Some(pages) => pages_for_engine(i64::from(pages)).map_err(DbError::ConfigError)?,
        };
        Ok(Self {
            next: PROBE_STEP_PAGES,
            rate,
        })
    }

    pub(crate) fn next_step(&self) -> i32 {
        self.next
    }

    /// Advance after a completed step, applying a caller override if any.
    pub(crate) fn advance(&mut self, requested: Option<i64>) -> Result<(), DbError> {
        if let Some(pages) = requested {
            self.rate = pages_for_engine(pages).map_err(DbError::ProgressCallbackError)?;
        }
        self.next = self.rate;
        Ok(())
    }
}

fn pages_for_engine(pages: i64) -> Result<i32, String> {
    match i32::try_from(pages) {
        Ok(0) => Ok(-1),
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!(
            "step size must be between 0 and {}, got {pages}",
            i32::MAX
        )),
    }
}

/// Map an attachment name onto the engine's schema selector.
pub(crate) fn database_name(attachment: &str) -> DatabaseName<'_> {
    match attachment {
        "main" => DatabaseName::Main,
        "temp" => DatabaseName::Temp,
        other => DatabaseName::Attached(other),
    }
}

/// Reject empty attachment names before touching the engine.
pub(crate) fn validate_attachment(attachment: &str) -> Result<(), DbError> {
    if attachment.trim().is_empty() {
        Err(DbError::ConfigError(
            "attachment name cannot be empty".into(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_probes_then_uses_rate() -> Result<(), DbError> {
        let mut plan = StepPlan::new(None)?;
        assert_eq!(plan.next_step(), PROBE_STEP_PAGES);
        plan.advance(None)?;
        assert_eq!(plan.next_step(), DEFAULT_STEP_PAGES);
        plan.advance(Some(7))?;
        assert_eq!(plan.next_step(), 7);
        plan.advance(None)?;
        assert_eq!(plan.next_step(), 7);
        Ok(())
    }

    #[test]
    fn zero_means_everything_left() -> Result<(), DbError> {
        let mut plan = StepPlan::new(Some(0))?;
        plan.advance(None)?;
        assert_eq!(plan.next_step(), -1);
        Ok(())
    }

    #[test]
    fn out_of_range_override_is_a_callback_error() -> Result<(), DbError> {
        let mut plan = StepPlan::new(None)?;
        assert!(matches!(
            plan.advance(Some(-3)),
            Err(DbError::ProgressCallbackError(_))
        ));
        assert!(matches!(
            plan.advance(Some(i64::from(i32::MAX) + 1)),
            Err(DbError::ProgressCallbackError(_))
        ));
        plan.advance(Some(i64::from(i32::MAX)))?;
        assert_eq!(plan.next_step(), i32::MAX);
        Ok(())
    }

    #[test]
    fn progress_counts_copied_pages() {
        let progress = BackupProgress {
            total_pages: 10,
            remaining_pages: 4,
        };
        assert_eq!(progress.copied_pages(), 6);
        assert!(!progress.is_complete());
    }

    #[test]
    fn empty_attachment_rejected() {
        assert!(matches!(validate_attachment(" "), Err(DbError::ConfigError(_))));
        assert!(validate_attachment("main").is_ok());
    }
}
