#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};
    use parking_lot::Mutex;
    use respite::libs::activity::{ActivityState, InputEvent, ManualListener};
    use respite::libs::break_kind::BreakKind;
    use respite::libs::breaks::{BreakEvent, BreakStage};
    use respite::libs::clock::SimulatedClock;
    use respite::libs::config::{timer_key, ConfigProvider, ConfigValue, MemoryConfig, MONITOR_IDLE, TIMER_LIMIT};
    use respite::libs::engine::{Engine, OperationMode};
    use respite::libs::timer::TimerState;
    use std::sync::Arc;
    use std::time::Duration;
    use test_context::{test_context, TestContext};

    const MICRO: BreakKind = BreakKind::MicroBreak;

    type Events = Arc<Mutex<Vec<(BreakKind, BreakEvent)>>>;

    /// Engine on a simulated clock with a one second idle threshold, so that
    /// the user goes idle on the first heartbeat without input.
    struct EngineTestContext {
        config: Arc<MemoryConfig>,
        clock: Arc<SimulatedClock>,
        engine: Arc<Engine>,
        events: Events,
    }

    impl TestContext for EngineTestContext {
        fn setup() -> Self {
            let config = Arc::new(MemoryConfig::new());
            config.set(MONITOR_IDLE, ConfigValue::Int(1000));

            let clock = Arc::new(SimulatedClock::starting_at(Local.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
            let engine = Arc::new(Engine::with_simulated_clock(config.clone(), clock.clone()));
            engine.monitor().start(vec![Box::new(ManualListener::raw())]);

            let events: Events = Arc::new(Mutex::new(Vec::new()));
            let log = events.clone();
            engine.add_observer(move |kind: BreakKind, event: BreakEvent| log.lock().push((kind, event)));

            EngineTestContext {
                config,
                clock,
                engine,
                events,
            }
        }

        fn teardown(self) {
            self.engine.shutdown();
        }
    }

    impl EngineTestContext {
        fn active(&self, seconds: u64) {
            for _ in 0..seconds {
                self.engine.monitor().report(InputEvent::KeyPress);
                assert!(self.engine.simulate(Duration::from_secs(1), Duration::ZERO));
            }
        }

        fn idle(&self, seconds: u64) {
            assert!(self.engine.simulate(Duration::from_secs(seconds), Duration::ZERO));
        }

        fn take_events(&self) -> Vec<(BreakKind, BreakEvent)> {
            std::mem::take(&mut *self.events.lock())
        }

        fn micro_active(&self) -> u64 {
            self.engine.snapshot(MICRO).timer.elapsed_active
        }
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_short_idle_keeps_active_time_and_long_idle_resets(ctx: &mut EngineTestContext) {
        ctx.active(170);
        assert_eq!(ctx.micro_active(), 170);

        ctx.idle(15);
        let snapshot = ctx.engine.snapshot(MICRO);
        assert_eq!(snapshot.timer.elapsed_active, 170);
        assert_eq!(snapshot.timer.elapsed_idle, 15);

        ctx.idle(35);
        assert_eq!(ctx.micro_active(), 0);
        assert_eq!(ctx.engine.snapshot(MICRO).timer.state, TimerState::Armed);
        assert!(ctx.take_events().is_empty());
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_limit_is_announced_once(ctx: &mut EngineTestContext) {
        ctx.active(179);
        assert!(ctx.take_events().is_empty());

        ctx.active(1);
        assert_eq!(ctx.take_events(), vec![(MICRO, BreakEvent::PreludeStarted)]);

        ctx.active(1);
        assert!(ctx.take_events().is_empty());
        let snapshot = ctx.engine.snapshot(MICRO);
        assert_eq!(snapshot.timer.state, TimerState::LimitReached);
        assert_eq!(snapshot.timer.total_overdue, 1);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_resting_through_the_prelude_takes_the_break(ctx: &mut EngineTestContext) {
        ctx.active(180);
        ctx.idle(40);

        assert_eq!(
            ctx.take_events(),
            vec![
                (MICRO, BreakEvent::PreludeStarted),
                (MICRO, BreakEvent::BreakStarted),
                (MICRO, BreakEvent::BreakTaken),
                (MICRO, BreakEvent::BreakIdle),
                (MICRO, BreakEvent::BreakEnded),
            ]
        );
        assert_eq!(ctx.engine.snapshot(MICRO).stage, BreakStage::None);
        assert_eq!(ctx.micro_active(), 0);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_prelude_makes_the_user_idle(ctx: &mut EngineTestContext) {
        ctx.active(180);
        assert_eq!(ctx.engine.activity(), ActivityState::Idle);

        ctx.engine.monitor().report(InputEvent::KeyPress);
        assert_eq!(ctx.engine.activity(), ActivityState::Active);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_postpone_keeps_and_skip_clears_active_time(ctx: &mut EngineTestContext) {
        ctx.active(180);
        ctx.idle(10);
        assert_eq!(ctx.engine.snapshot(MICRO).stage, BreakStage::Taking);
        ctx.take_events();

        ctx.engine.postpone_break(MICRO);
        assert_eq!(
            ctx.take_events(),
            vec![
                (MICRO, BreakEvent::BreakPostponed),
                (MICRO, BreakEvent::BreakIdle),
                (MICRO, BreakEvent::BreakEnded),
            ]
        );
        assert_eq!(ctx.micro_active(), 180);

        ctx.engine.force_break(MICRO);
        assert_eq!(ctx.take_events(), vec![(MICRO, BreakEvent::BreakStartedForced)]);

        ctx.engine.skip_break(MICRO);
        assert_eq!(ctx.take_events()[0], (MICRO, BreakEvent::BreakSkipped));
        assert_eq!(ctx.micro_active(), 0);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_suspension_freezes_timers_and_resume_restores_activity(ctx: &mut EngineTestContext) {
        ctx.active(10);
        ctx.engine.suspend();

        ctx.active(60);
        assert_eq!(ctx.engine.activity(), ActivityState::Suspended);
        assert_eq!(ctx.micro_active(), 10);

        ctx.engine.resume();
        assert_eq!(ctx.engine.activity(), ActivityState::Active);
        ctx.active(5);
        assert_eq!(ctx.micro_active(), 15);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_quiet_mode_counts_time_but_starts_no_break(ctx: &mut EngineTestContext) {
        ctx.engine.set_operation_mode(OperationMode::Quiet);
        ctx.active(180);
        assert!(ctx.take_events().is_empty());
        let snapshot = ctx.engine.snapshot(MICRO);
        assert_eq!(snapshot.stage, BreakStage::None);
        assert_eq!(snapshot.timer.state, TimerState::LimitReached);

        // Back in normal mode the snooze renotification starts the break.
        ctx.engine.set_operation_mode(OperationMode::Normal);
        ctx.active(149);
        assert!(ctx.take_events().is_empty());
        ctx.active(1);
        assert_eq!(ctx.take_events(), vec![(MICRO, BreakEvent::PreludeStarted)]);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_entering_quiet_mode_stops_the_prelude(ctx: &mut EngineTestContext) {
        ctx.active(180);
        assert_eq!(ctx.take_events(), vec![(MICRO, BreakEvent::PreludeStarted)]);

        ctx.engine.set_operation_mode(OperationMode::Quiet);
        assert_eq!(ctx.engine.operation_mode(), OperationMode::Quiet);
        assert_eq!(
            ctx.take_events(),
            vec![
                (MICRO, BreakEvent::BreakIgnored),
                (MICRO, BreakEvent::BreakIdle),
                (MICRO, BreakEvent::BreakEnded),
            ]
        );
        assert_eq!(ctx.engine.snapshot(MICRO).stage, BreakStage::None);

        ctx.engine.set_operation_mode(OperationMode::Quiet);
        assert!(ctx.take_events().is_empty());
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_resume_only_leaves_suspension(ctx: &mut EngineTestContext) {
        ctx.engine.set_operation_mode(OperationMode::Quiet);
        ctx.engine.resume();
        assert_eq!(ctx.engine.operation_mode(), OperationMode::Quiet);

        ctx.engine.suspend();
        assert_eq!(ctx.engine.operation_mode(), OperationMode::Suspended);
        assert_eq!(ctx.engine.activity(), ActivityState::Suspended);
        ctx.engine.resume();
        assert_eq!(ctx.engine.operation_mode(), OperationMode::Normal);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_system_sleep_counts_as_rest(ctx: &mut EngineTestContext) {
        ctx.active(100);
        assert_eq!(ctx.micro_active(), 100);

        ctx.clock.suspend_for(Duration::from_secs(3600));
        ctx.idle(1);

        assert_eq!(ctx.engine.activity(), ActivityState::Idle);
        assert_eq!(ctx.micro_active(), 0);
        assert_eq!(ctx.engine.snapshot(BreakKind::RestBreak).timer.elapsed_active, 0);
        assert!(ctx.take_events().is_empty());
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_settings_change_applies_without_losing_active_time(ctx: &mut EngineTestContext) {
        ctx.active(30);
        assert!(ctx.config.set(&timer_key(MICRO, TIMER_LIMIT), ConfigValue::Int(60)));
        assert_eq!(ctx.micro_active(), 30);
        assert_eq!(ctx.engine.snapshot(MICRO).timer.limit, 60);

        ctx.active(30);
        assert_eq!(ctx.take_events(), vec![(MICRO, BreakEvent::PreludeStarted)]);
    }

    #[test_context(EngineTestContext)]
    #[test]
    fn test_observer_may_call_back_into_the_engine(ctx: &mut EngineTestContext) {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let engine = Arc::downgrade(&ctx.engine);
        let seen = stages.clone();
        ctx.engine.add_observer(move |kind: BreakKind, _event: BreakEvent| {
            if let Some(engine) = engine.upgrade() {
                seen.lock().push(engine.snapshot(kind).stage);
            }
        });

        ctx.active(180);
        assert_eq!(*stages.lock(), vec![BreakStage::Prelude]);
    }

    #[test]
    fn test_without_backend_the_user_counts_as_active() {
        let clock = Arc::new(SimulatedClock::starting_at(Local.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let engine = Engine::with_simulated_clock(Arc::new(MemoryConfig::new()), clock);
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        engine.add_observer(move |kind: BreakKind, event: BreakEvent| log.lock().push((kind, event)));

        assert_eq!(engine.start(Vec::new()).unwrap(), None);
        assert!(engine.monitor().is_degraded());

        assert!(engine.simulate(Duration::from_secs(180), Duration::ZERO));
        assert_eq!(engine.activity(), ActivityState::Active);
        assert_eq!(*events.lock(), vec![(MICRO, BreakEvent::PreludeStarted)]);
        engine.shutdown();
    }

    #[test]
    fn test_defaults_are_written_to_the_provider() {
        let config = Arc::new(MemoryConfig::new());
        let clock = Arc::new(SimulatedClock::starting_at(Local::now()));
        let engine = Engine::with_simulated_clock(config.clone(), clock);

        assert_eq!(config.get_int(&timer_key(MICRO, TIMER_LIMIT)), Some(180));
        assert_eq!(engine.snapshots().len(), BreakKind::COUNT);
        assert!(engine.snapshots()[2].timer.daily_reset.is_some());
    }
}
