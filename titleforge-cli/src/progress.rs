//! Terminal progress rendering.
//!
//! Bridges a library [`ProgressJob`] to an indicatif byte bar: the
//! job's observer callback drives the bar, so the library stays free
//! of terminal concerns.

use indicatif::{ProgressBar, ProgressStyle};
use titleforge::progress::{ProgressEvent, ProgressJob};

/// Attach a byte-progress bar to a job.
///
/// The bar follows the job's lifecycle events and clears itself when
/// the job finishes.
pub fn attach_bar(job: &ProgressJob, message: String) -> ProgressBar {
    let bar = ProgressBar::new(job.expected());
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    bar.set_message(message);

    let observer_bar = bar.clone();
    job.set_observer(Box::new(move |event| match event {
        ProgressEvent::Started => {}
        ProgressEvent::Progressed {
            completed,
            expected,
        } => {
            observer_bar.set_length(expected);
            observer_bar.set_position(completed);
        }
        ProgressEvent::Finished { .. } => {
            observer_bar.finish_and_clear();
        }
    }));
    bar
}
