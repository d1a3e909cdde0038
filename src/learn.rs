use crate::result::Result;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    iter::empty,
    time::{Duration, Instant},
};

/// Criteria.
pub mod criterion;
/// Neural Networks.
pub mod neural_network;

/// Training / Testing statistics.
///
/// `loss` is the mean over `count` samples, `correct` the number of samples classified correctly.
#[derive(Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    count: usize,
    loss: Option<f32>,
    correct: Option<usize>,
}

impl Stats {
    /// Creates stats for `count` samples.
    pub fn new(count: usize, loss: Option<f32>, correct: Option<usize>) -> Self {
        Self {
            count,
            loss,
            correct,
        }
    }
    /// The number of samples.
    pub fn count(&self) -> usize {
        self.count
    }
    /// The mean loss.
    pub fn loss(&self) -> Option<f32> {
        self.loss
    }
    /// The number of correct predictions.
    pub fn correct(&self) -> Option<usize> {
        self.correct
    }
    /// The fraction of correct predictions, `correct / count`.
    pub fn accuracy(&self) -> Option<f32> {
        let correct = self.correct?;
        if self.count == 0 {
            return None;
        }
        Some(correct as f32 / self.count as f32)
    }
    /// Combines with the stats of other samples.
    ///
    /// Losses are weighted by count. A loss or correct count missing from either side is missing
    /// from the result, unless that side has no samples.
    pub fn merge(self, other: Self) -> Self {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let count = self.count + other.count;
        let loss = self.loss.zip(other.loss).map(|(a, b)| {
            (a * self.count as f32 + b * other.count as f32) / count as f32
        });
        let correct = self.correct.zip(other.correct).map(|(a, b)| a + b);
        Self {
            count,
            loss,
            correct,
        }
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "count: {}", self.count)?;
        if let Some(loss) = self.loss {
            write!(f, " loss: {loss:.5}")?;
        }
        if let Some(accuracy) = self.accuracy() {
            write!(f, " accuracy: {:.2}%", accuracy * 100.)?;
        }
        Ok(())
    }
}

/// Summary of training.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    epoch: usize,
    epoch_time: Duration,
    total_time: Duration,
    train: Stats,
    test: Stats,
}

impl Summary {
    /// Runs an epoch with `f`.
    ///
    /// Times `f`. If `f` returns `Ok`, updates the epoch time and accumulates the total time and the epoch. Otherwise returns the error.
    pub fn run_epoch<F>(&mut self, mut f: F) -> Result<(Stats, Stats)>
    where
        F: FnMut(&Self) -> Result<(Stats, Stats)>,
    {
        let start = Instant::now();
        let (train, test) = f(self)?;
        self.epoch_time = start.elapsed();
        self.total_time += self.epoch_time;
        self.epoch += 1;
        self.train = train;
        self.test = test;
        Ok((train, test))
    }
    /// The number of completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }
    /// The duration of the last epoch.
    pub fn epoch_time(&self) -> Duration {
        self.epoch_time
    }
    /// The total duration of all epochs.
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
    /// The training stats of the last epoch.
    pub fn train(&self) -> Stats {
        self.train
    }
    /// The testing stats of the last epoch.
    pub fn test(&self) -> Stats {
        self.test
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "epoch: {} elapsed: {:.2?} train: [{}] test: [{}]",
            self.epoch, self.epoch_time, self.train, self.test
        )
    }
}

/// Summerizes the trainer.
pub trait Summarize {
    /// Returns a summary.
    fn summarize(&self) -> Summary;
}

/// Training.
///
/// [`Train`] is a general purpose trait for machine learning "trainers" that train a model, potentially iteratively with several "epochs".
///
/// # Summary
/// Implement [`Summarize`], as the trainer is expected to compute a summary on each call to [`.train_test()`](Train::train_test()). Use [`Summary::run_epoch()`] to compute the next summary.
///
/// # Test
/// Implement [`Test`] so that the model can be tested without exclusive access.
pub trait Train<X> {
    /// Trains the model with the training and testing sets.
    ///
    /// Returns (`train_stats`, `test_stats`).
    ///
    /// **Errors**
    /// Returns an error if training / testing could not be performed. The trainer may be modified even when returning an error.
    fn train_test<I1, I2>(&mut self, train_iter: I1, test_iter: I2) -> Result<(Stats, Stats)>
    where
        I1: IntoIterator<Item = X>,
        I2: IntoIterator<Item = X>;
    /// Trains the model with the training set.
    ///
    /// Returns the training stats.
    ///
    /// **Errors**
    /// Returns an error if training could not be performed. The trainer may be modified even when returning an error.
    fn train<I>(&mut self, train_iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = X>,
    {
        Ok(self.train_test(train_iter, empty())?.0)
    }
}

/// Testing / Evaluation.
///
/// [`Test`] is a general purpose trait for testing / evaluating a trainer / model.
pub trait Test<X> {
    /// Tests the model with the test data.
    ///
    /// Unlike [`Train::train_test()`], this method does not require mutable (exclusive) access.
    ///
    /// Returns the testing stats.
    ///
    /// **Errors**
    /// Returns an error if testing could not be performed.
    fn test<I>(&self, test_iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = X>;
}

/// Prediction.
pub trait Predict<X> {
    /// Predicts the class of each sample.
    ///
    /// **Errors**
    /// Returns an error if the input is not valid for the model.
    fn predict(&self, input: X) -> Result<Array1<usize>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stats_merge() {
        let a = Stats::new(10, Some(1.), Some(5));
        let b = Stats::new(30, Some(2.), Some(27));
        let stats = a.merge(b);
        assert_eq!(stats.count(), 40);
        assert_relative_eq!(stats.loss().unwrap(), 1.75);
        assert_eq!(stats.correct(), Some(32));
        assert_relative_eq!(stats.accuracy().unwrap(), 0.8);
        assert_eq!(Stats::default().merge(a), a);
        assert_eq!(Stats::new(1, None, Some(1)).merge(a).loss(), None);
    }

    #[test]
    fn stats_display() {
        assert_eq!(
            Stats::new(4, Some(0.5), Some(3)).to_string(),
            "count: 4 loss: 0.50000 accuracy: 75.00%"
        );
        assert_eq!(Stats::default().accuracy(), None);
    }

    #[test]
    fn summary_run_epoch() {
        let mut summary = Summary::default();
        let train = Stats::new(2, Some(1.), None);
        summary
            .run_epoch(|summary| {
                assert_eq!(summary.epoch(), 0);
                Ok((train, Stats::default()))
            })
            .unwrap();
        assert_eq!(summary.epoch(), 1);
        assert_eq!(summary.train(), train);
        assert!(summary
            .run_epoch(|_| anyhow::bail!("failed"))
            .is_err());
        assert_eq!(summary.epoch(), 1);
    }
}
