//! Tests for the periodic lag monitor

#[cfg(test)]
mod tests {
    use crate::broker::AdminClient;
    use crate::consumer::tests::{ScriptedAdmin, GROUP, TOPIC};
    use crate::consumer::LagMonitor;
    use crate::core::loop_state::{run_token, LoopState};
    use crate::core::time::TokioClock;
    use crate::stats::StatsSink;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    fn monitor(admin: &Arc<ScriptedAdmin>, stats: &StatsSink) -> LagMonitor {
        LagMonitor::new(
            Arc::clone(admin) as Arc<dyn AdminClient>,
            stats.clone(),
            TOPIC,
            GROUP,
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_tick_publishes_per_partition_lag() {
        let admin = ScriptedAdmin::with_offsets(&[(3, 1_000), (4, 50)], &[(3, 700), (4, 50)]);
        let stats = StatsSink::new().unwrap();

        monitor(&admin, &stats).tick().await;

        assert_eq!(stats.lag(TOPIC, GROUP, 3), Some(300));
        assert_eq!(stats.lag(TOPIC, GROUP, 4), Some(0));
        assert_eq!(admin.connects.load(Ordering::SeqCst), 1);
        assert_eq!(admin.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_committed_fetch_publishes_nothing() {
        let admin = ScriptedAdmin::with_offsets(&[(0, 10)], &[(0, 5)]);
        admin.fail_committed.store(true, Ordering::SeqCst);
        let stats = StatsSink::new().unwrap();

        monitor(&admin, &stats).tick().await;

        assert_eq!(stats.lag(TOPIC, GROUP, 0), None);
        assert_eq!(stats.lag_poll_errors(TOPIC, GROUP), 1);
        // The admin connection is released on the failure path too
        assert_eq!(admin.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_lag_aborts_the_whole_tick() {
        let admin = ScriptedAdmin::with_offsets(&[(0, 10), (1, 10)], &[(0, 5), (1, 12)]);
        let stats = StatsSink::new().unwrap();

        monitor(&admin, &stats).tick().await;

        assert_eq!(stats.lag_series(), 0);
        assert_eq!(stats.lag_poll_errors(TOPIC, GROUP), 1);
    }

    #[tokio::test]
    async fn test_failed_tick_recovers_on_the_next_one() {
        let admin = ScriptedAdmin::with_offsets(&[(0, 10)], &[(0, 4)]);
        admin.fail_latest.store(true, Ordering::SeqCst);
        let stats = StatsSink::new().unwrap();
        let monitor = monitor(&admin, &stats);

        monitor.tick().await;
        assert_eq!(stats.lag(TOPIC, GROUP, 0), None);

        admin.fail_latest.store(false, Ordering::SeqCst);
        monitor.tick().await;
        assert_eq!(stats.lag(TOPIC, GROUP, 0), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_ticks_on_interval_until_cancelled() {
        let admin = ScriptedAdmin::with_offsets(&[(0, 10)], &[(0, 9)]);
        let stats = StatsSink::new().unwrap();
        let (handle, token) = run_token();
        let task = monitor(&admin, &stats).spawn(token);

        // No tick before the first interval has elapsed
        sleep(Duration::from_secs(9)).await;
        assert_eq!(admin.connects.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(admin.connects.load(Ordering::SeqCst), 1);
        assert_eq!(stats.lag(TOPIC, GROUP, 0), Some(1));

        sleep(Duration::from_secs(20)).await;
        assert_eq!(admin.connects.load(Ordering::SeqCst), 3);

        handle.cancel();
        task.await.unwrap();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(admin.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_monitor_stops_when_the_loop_finishes() {
        let admin = ScriptedAdmin::with_offsets(&[(0, 10)], &[(0, 9)]);
        let stats = StatsSink::new().unwrap();
        let state = Arc::new(LoopState::new(Arc::new(TokioClock)));
        state.begin();
        let (_handle, token) = run_token();
        let task = monitor(&admin, &stats)
            .bound_to(Arc::clone(&state))
            .spawn(token);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(admin.connects.load(Ordering::SeqCst), 1);

        // The handle is still live; the finished loop alone ends the monitor
        state.finish();
        sleep(Duration::from_secs(10)).await;
        task.await.unwrap();
        assert_eq!(admin.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bound_tick_after_finish_publishes_nothing() {
        let admin = ScriptedAdmin::with_offsets(&[(0, 10)], &[(0, 4)]);
        admin.fail_latest.store(true, Ordering::SeqCst);
        let stats = StatsSink::new().unwrap();
        let state = Arc::new(LoopState::new(Arc::new(TokioClock)));
        let monitor = monitor(&admin, &stats).bound_to(state);

        monitor.tick().await;
        assert_eq!(stats.lag_poll_errors(TOPIC, GROUP), 0);

        admin.fail_latest.store(false, Ordering::SeqCst);
        monitor.tick().await;
        assert_eq!(stats.lag_series(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_stops_the_monitor() {
        let admin = ScriptedAdmin::with_offsets(&[(0, 1)], &[(0, 1)]);
        let stats = StatsSink::new().unwrap();
        let (handle, token) = run_token();
        let task = monitor(&admin, &stats).spawn(token);

        drop(handle);
        task.await.unwrap();
        assert_eq!(admin.connects.load(Ordering::SeqCst), 0);
    }
}
