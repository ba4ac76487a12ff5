// Parallel map over resource units.
//
// One fan-out per phase: each worker gets one resource unit and may touch
// only that unit plus the shared grids through their commutative
// operations. With `multithreading` off the runner degrades to a plain
// sequential loop — mandatory for bit-identical regression runs, since
// the concurrent float combine on the light field is commutative but not
// associative.
//
// Errors raised by workers are collected and the first one is re-raised
// at the phase barrier, matching the driver's paused-with-error handling.

use rayon::prelude::*;

use crate::error::SimError;

#[derive(Clone, Copy, Debug)]
pub struct ThreadRunner {
    multithreaded: bool,
}

impl ThreadRunner {
    pub fn new(multithreaded: bool) -> Self {
        Self { multithreaded }
    }

    pub fn is_multithreaded(&self) -> bool {
        self.multithreaded
    }

    /// Apply `f` to every item.
    pub fn run<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(&mut T) + Send + Sync,
    {
        if self.multithreaded {
            items.par_iter_mut().for_each(f);
        } else {
            for item in items.iter_mut() {
                f(item);
            }
        }
    }

    /// Apply a fallible `f`; the first error (in item order) is returned
    /// after the full fan-out finished.
    pub fn run_fallible<T, F>(&self, items: &mut [T], f: F) -> Result<(), SimError>
    where
        T: Send,
        F: Fn(&mut T) -> Result<(), SimError> + Send + Sync,
    {
        if self.multithreaded {
            let mut results: Vec<Result<(), SimError>> =
                items.par_iter_mut().map(f).collect();
            results.drain(..).find(|r| r.is_err()).unwrap_or(Ok(()))
        } else {
            let mut first_error = None;
            for item in items.iter_mut() {
                if let Err(err) = f(item)
                    && first_error.is_none()
                {
                    first_error = Some(err);
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_every_item_in_both_modes() {
        for multithreaded in [false, true] {
            let runner = ThreadRunner::new(multithreaded);
            let mut items = vec![0u32; 64];
            runner.run(&mut items, |v| *v += 1);
            assert!(items.iter().all(|v| *v == 1));
        }
    }

    #[test]
    fn fallible_returns_first_error_but_completes() {
        let runner = ThreadRunner::new(false);
        let mut items: Vec<u32> = (0..10).collect();
        let result = runner.run_fallible(&mut items, |v| {
            *v += 100;
            if *v == 103 { Err(SimError::Config("boom".into())) } else { Ok(()) }
        });
        assert!(result.is_err());
        // the fan-out still visited every item
        assert!(items.iter().all(|v| *v >= 100));
    }

    #[test]
    fn parallel_fallible_reports_error() {
        let runner = ThreadRunner::new(true);
        let mut items: Vec<u32> = (0..100).collect();
        let result = runner.run_fallible(&mut items, |v| {
            if *v == 50 { Err(SimError::Config("mid".into())) } else { Ok(()) }
        });
        assert!(result.is_err());
    }
}
