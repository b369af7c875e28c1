//! Plain-text rendering of progress updates for a terminal.

use estate_progress::reducer::ProgressUpdate;
use estate_progress::ProgressSnapshot;

/// Width of the progress bar in characters.
const BAR_WIDTH: usize = 20;

/// `[#######.............]` for the given percentage.
pub fn progress_bar(percent: u8, width: usize) -> String {
    let percent = usize::from(percent.min(100));
    let filled = percent * width / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

/// Stage label such as `scraping / listing (2/5)`. Empty parts are
/// skipped.
pub fn stage_label(stage: &str, substage: &str, step: Option<u32>, total: Option<u32>) -> String {
    let mut label = match (stage.is_empty(), substage.is_empty()) {
        (false, false) => format!("{stage} / {substage}"),
        (false, true) => stage.to_string(),
        (true, false) => substage.to_string(),
        (true, true) => String::new(),
    };

    if let Some(step) = step {
        let counter = match total {
            Some(total) => format!("({step}/{total})"),
            None => format!("({step})"),
        };
        if !label.is_empty() {
            label.push(' ');
        }
        label.push_str(&counter);
    }

    label
}

/// One line per progress update.
pub fn progress_line(update: &ProgressUpdate) -> String {
    let mut line = format!(
        "{} {:>3}%",
        progress_bar(update.progress, BAR_WIDTH),
        update.progress
    );

    let label = stage_label(&update.stage, &update.substage, update.step, update.total_steps);
    if !label.is_empty() {
        line.push_str("  ");
        line.push_str(&label);
    }

    let text = if update.status.is_empty() {
        &update.message
    } else {
        &update.status
    };
    if !text.is_empty() {
        line.push_str(": ");
        line.push_str(text);
    }

    if let Some(url) = &update.url {
        line.push_str(" <");
        line.push_str(url);
        line.push('>');
    }

    line
}

/// Final summary for a finished snapshot.
pub fn summary_line(snapshot: &ProgressSnapshot) -> String {
    if snapshot.is_complete {
        let message: &str = if snapshot.message.is_empty() {
            "Task completed"
        } else {
            &snapshot.message
        };
        format!("{} 100%  {message}", progress_bar(100, BAR_WIDTH))
    } else if let Some(error) = &snapshot.error_message {
        format!("error: {error}")
    } else {
        format!("stopped at {}%", snapshot.progress)
    }
}
