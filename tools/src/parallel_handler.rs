//! A thread pool that runs a closure in parallel, with a bounded channel in
//! front of it for backpressure.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{bail, format_err, Error};
use crossbeam_channel::{bounded, Sender};

/// A handle to send data to the worker threads (cheap to clone).
pub struct SendHandle<I> {
    input: Sender<I>,
    abort: Arc<Mutex<Option<String>>>,
}

fn check_abort(abort: &Mutex<Option<String>>) -> Result<(), Error> {
    let guard = abort.lock().unwrap();
    if let Some(err_msg) = &*guard {
        return Err(format_err!("{}", err_msg));
    }
    Ok(())
}

impl<I: Send> SendHandle<I> {
    pub fn send(&self, input: I) -> Result<(), Error> {
        check_abort(&self.abort)?;
        match self.input.send(input) {
            Ok(()) => Ok(()),
            Err(_) => bail!("send failed - channel closed"),
        }
    }
}

impl<I> Clone for SendHandle<I> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
            abort: Arc::clone(&self.abort),
        }
    }
}

/// A thread pool running the supplied closure on each item sent to it.
///
/// `send` feeds the bounded channel; once `threads` items are in flight the
/// sender blocks, which is the backpressure mechanism. If a handler
/// invocation returns an error, the channel is marked aborted and no further
/// sends succeed; `complete()` surfaces that error (and any thread panics)
/// once every in-flight item has drained.
pub struct ParallelHandler<I> {
    handles: Vec<JoinHandle<()>>,
    name: String,
    input: Option<SendHandle<I>>,
}

impl<I: Send + 'static> ParallelHandler<I> {
    /// Spawns `threads` workers, each running `handler_fn` on items received
    /// from a channel bounded to `threads` in-flight items.
    pub fn new<F>(name: &str, threads: usize, handler_fn: F) -> Self
    where
        F: Fn(I) -> Result<(), Error> + Send + Clone + 'static,
    {
        let mut handles = Vec::new();
        let (input_tx, input_rx) = bounded::<I>(threads);
        let abort = Arc::new(Mutex::new(None));

        for i in 0..threads {
            let input_rx = input_rx.clone();
            let abort = Arc::clone(&abort);
            let handler_fn = handler_fn.clone();

            handles.push(
                std::thread::Builder::new()
                    .name(format!("{name} ({i})"))
                    .spawn(move || loop {
                        let data = match input_rx.recv() {
                            Ok(data) => data,
                            Err(_) => return,
                        };
                        if let Err(err) = (handler_fn)(data) {
                            let mut guard = abort.lock().unwrap();
                            if guard.is_none() {
                                *guard = Some(err.to_string());
                            }
                        }
                    })
                    .unwrap(),
            );
        }

        Self {
            handles,
            name: name.to_string(),
            input: Some(SendHandle { input: input_tx, abort }),
        }
    }

    /// Returns a cloneable channel to send data to the worker threads.
    pub fn channel(&self) -> SendHandle<I> {
        self.input.as_ref().unwrap().clone()
    }

    /// Sends one item, blocking while all `threads` workers are busy.
    pub fn send(&self, input: I) -> Result<(), Error> {
        self.input.as_ref().unwrap().send(input)
    }

    /// Closes the channel, waits for every worker to drain, and returns the
    /// first handler error or panic message encountered, if any.
    pub fn complete(mut self) -> Result<(), Error> {
        let input = self.input.take().unwrap();
        let abort = Arc::clone(&input.abort);
        check_abort(&abort)?;
        drop(input);

        let msg_list = self.join_threads();
        check_abort(&abort)?;

        if msg_list.is_empty() {
            return Ok(());
        }
        Err(format_err!("{}", msg_list.join("\n")))
    }

    fn join_threads(&mut self) -> Vec<String> {
        let mut msg_list = Vec::new();
        let mut i = 0;
        while let Some(handle) = self.handles.pop() {
            if let Err(panic) = handle.join() {
                match panic.downcast::<&str>() {
                    Ok(panic_msg) => msg_list.push(format!("thread {} ({i}) panicked: {panic_msg}", self.name)),
                    Err(_) => msg_list.push(format!("thread {} ({i}) panicked", self.name)),
                }
            }
            i += 1;
        }
        msg_list
    }
}

impl<I> Drop for ParallelHandler<I> {
    fn drop(&mut self) {
        drop(self.input.take());
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_item_across_worker_threads() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        let pool = ParallelHandler::new("test pool", 4, move |n: usize| {
            counter2.fetch_add(n, Ordering::SeqCst);
            Ok(())
        });

        for i in 0..100 {
            pool.send(i).unwrap();
        }
        pool.complete().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), (0..100).sum());
    }

    #[test]
    fn complete_surfaces_a_handler_error() {
        let pool = ParallelHandler::new("test pool", 2, |n: i32| {
            if n == 3 {
                bail!("hit 3");
            }
            Ok(())
        });

        for i in 0..10 {
            let _ = pool.send(i);
        }
        assert!(pool.complete().is_err());
    }
}
