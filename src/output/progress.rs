//! Progress bar utilities for training stages.

use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar over audio files.
pub fn create_file_progress(total_files: usize, enabled: bool) -> Option<ProgressBar> {
    create_progress(
        total_files,
        enabled,
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files ({eta})",
    )
}

/// Create a progress bar over feature extraction batches.
pub fn create_batch_progress(total_batches: usize, split: &str, enabled: bool) -> Option<ProgressBar> {
    create_progress(
        total_batches,
        enabled,
        &format!("[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} batches - {split}"),
    )
}

/// Create a progress bar over epochs; the message carries the latest metrics.
pub fn create_epoch_progress(max_epochs: usize, enabled: bool) -> Option<ProgressBar> {
    create_progress(
        max_epochs,
        enabled,
        "[{elapsed_precise}] {bar:40.green/blue} epoch {pos}/{len} {msg}",
    )
}

fn create_progress(total: usize, enabled: bool, template: &str) -> Option<ProgressBar> {
    if !enabled || total == 0 {
        return None;
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    Some(pb)
}

/// Finish a progress bar with a message.
pub fn finish_progress(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message.to_string());
    }
}

/// Increment a progress bar.
pub fn inc_progress(pb: Option<&ProgressBar>) {
    if let Some(pb) = pb {
        pb.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_or_empty_has_no_bar() {
        assert!(create_file_progress(10, false).is_none());
        assert!(create_file_progress(0, true).is_none());
        assert!(create_batch_progress(0, "train", true).is_none());
    }

    #[test]
    fn test_enabled_bar_tracks_length() {
        let pb = create_epoch_progress(5, true);
        assert_eq!(pb.as_ref().and_then(ProgressBar::length), Some(5));
        inc_progress(pb.as_ref());
        assert_eq!(pb.as_ref().map(ProgressBar::position), Some(1));
        finish_progress(pb, "done");
    }
}
