use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

const TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// counts processed samples over one pass of the dataset
pub struct ProgressReporter {
    bar: ProgressBar,
    processed: usize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self::with_bar(bar)
    }

    /// a reporter that draws nothing
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self { bar, processed: 0 }
    }

    pub fn reset(&mut self, dataset_size: usize) {
        self.processed = 0;
        self.bar.set_length(dataset_size as u64);
        self.bar.set_position(0);
        self.bar.reset_elapsed();
    }

    pub fn update(&mut self, batch_id: usize, batch_size: usize) {
        self.processed += batch_size;
        self.bar.set_position(self.processed as u64);
        self.bar.set_message(format!("batch {}", batch_id));
        debug!("batch {} done, {} samples processed", batch_id, self.processed);
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_samples() {
        let mut progress = ProgressReporter::hidden();
        progress.reset(5);
        progress.update(0, 2);
        progress.update(1, 2);
        progress.update(2, 1);
        assert_eq!(progress.processed(), 5);
        progress.reset(5);
        assert_eq!(progress.processed(), 0);
        progress.finish();
    }
}
