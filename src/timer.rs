//! Round countdown timer
//!
//! Each round runs one countdown that ticks once per second down to zero.
//! The timer never transitions game state itself: it reports back whether
//! it ran to completion, and the session performs the timeout transition
//! under its resolution guard. Preemption is checked before every tick and
//! once more at expiry, so a resolved or superseded round silently ends
//! its timer on the next check.

use std::{future::Future, time::Duration};

/// How a countdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEnd {
    /// The countdown ran to zero without being preempted
    Elapsed,
    /// A preemption condition held; no timeout should be signalled
    Preempted,
}

/// Runs a countdown of `seconds` ticks
///
/// `preempted` is consulted before every tick and at expiry; when it
/// returns `true` the countdown exits immediately with
/// [`CountdownEnd::Preempted`]. `on_tick` receives the seconds left
/// (descending to zero) and is typically used to update a visible
/// countdown message; its failures are its own concern and must be
/// swallowed there.
pub async fn run_countdown<P, T, F>(seconds: u64, mut preempted: P, mut on_tick: T) -> CountdownEnd
where
    P: FnMut() -> bool,
    T: FnMut(u64) -> F,
    F: Future<Output = ()>,
{
    let mut left = seconds;
    loop {
        if preempted() {
            return CountdownEnd::Preempted;
        }
        on_tick(left).await;
        if left == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        left -= 1;
    }

    if preempted() {
        return CountdownEnd::Preempted;
    }
    CountdownEnd::Elapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    fn tick_recorder() -> (
        Arc<Mutex<Vec<u64>>>,
        impl FnMut(u64) -> Pin<Box<dyn Future<Output = ()>>>,
    ) {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let on_tick = move |left| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(left);
            }) as Pin<Box<dyn Future<Output = ()>>>
        };
        (ticks, on_tick)
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_to_zero_and_elapses() {
        let (ticks, on_tick) = tick_recorder();
        let end = run_countdown(3, || false, on_tick).await;

        assert_eq!(end, CountdownEnd::Elapsed);
        assert_eq!(*ticks.lock().unwrap(), vec![3, 2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn preemption_stops_ticking_early() {
        let (ticks, on_tick) = tick_recorder();
        let checks = AtomicUsize::new(0);
        let end = run_countdown(
            10,
            || checks.fetch_add(1, Ordering::Relaxed) >= 2,
            on_tick,
        )
        .await;

        assert_eq!(end, CountdownEnd::Preempted);
        assert_eq!(*ticks.lock().unwrap(), vec![10, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn preemption_at_expiry_suppresses_elapse() {
        let (ticks, on_tick) = tick_recorder();
        let checks = AtomicUsize::new(0);
        let end = run_countdown(1, || checks.fetch_add(1, Ordering::Relaxed) >= 2, on_tick).await;

        assert_eq!(end, CountdownEnd::Preempted);
        assert_eq!(*ticks.lock().unwrap(), vec![1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_second_countdown_ticks_once() {
        let (ticks, on_tick) = tick_recorder();
        let end = run_countdown(0, || false, on_tick).await;

        assert_eq!(end, CountdownEnd::Elapsed);
        assert_eq!(*ticks.lock().unwrap(), vec![0]);
    }
}
