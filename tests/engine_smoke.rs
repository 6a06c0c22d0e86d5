mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use barrage::ammo::LogProvider;
use barrage::engine::{Engine, GunFactory, ScheduleFactory, UserPool};
use barrage::gun::{Gun, LogGun};
use barrage::schedule::{self, Schedule};
use barrage::Error;

use common::Collect;

fn log_gun() -> GunFactory {
    Arc::new(|| Ok(Box::new(LogGun::new()) as Box<dyn Gun>))
}

fn periodic(period: Duration) -> ScheduleFactory {
    Arc::new(move || schedule::periodic(period, None, None))
}

fn log_pool(agg: Arc<Collect>, limit: u64, shared_schedule: bool) -> UserPool {
    UserPool {
        id: "smoke".into(),
        gun: log_gun(),
        provider: Arc::new(LogProvider::new(limit, 8)),
        aggregator: agg,
        schedule: periodic(Duration::from_secs(1)),
        startup: periodic(Duration::from_millis(100)),
        shared_schedule,
    }
}

#[tokio::test(start_paused = true)]
async fn log_smoke_fires_every_ammo() {
    let agg = Collect::new();
    let engine = Engine::new(vec![log_pool(agg.clone(), 30, false)]);

    tokio::time::timeout(Duration::from_millis(3500), engine.run(CancellationToken::new()))
        .await
        .expect("engine finishes once ammo runs out")
        .unwrap();

    let seen = agg.seen();
    assert_eq!(seen.len(), 30);
    for s in &seen {
        assert_eq!(s.tag, "REQUEST");
        assert!(s.rtt > 0);
        assert_eq!(s.code, 200);
    }
}

#[tokio::test(start_paused = true)]
async fn shared_schedule_caps_pool_rate() {
    let agg = Collect::new();
    let mut pool = log_pool(agg.clone(), 0, true);
    let once: ScheduleFactory = Arc::new(|| {
        Ok(Box::new(schedule::Size::new(7, Box::new(schedule::Unlimited))) as Box<dyn Schedule>)
    });
    pool.schedule = once;
    let engine = Engine::new(vec![pool]);

    let ctx = CancellationToken::new();
    let running = tokio::spawn({
        let ctx = ctx.clone();
        async move { engine.run(ctx).await }
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    ctx.cancel();
    assert!(matches!(running.await.unwrap(), Err(Error::Cancelled)));

    // Seven ticks for the whole pool, however many users started.
    assert_eq!(agg.seen().len(), 7);
}

#[tokio::test(start_paused = true)]
async fn cancelled_engine_reports_cancellation() {
    let agg = Collect::new();
    let engine = Engine::new(vec![log_pool(agg.clone(), 0, false), log_pool(Collect::new(), 0, false)]);
    let ctx = CancellationToken::new();
    let running = tokio::spawn({
        let ctx = ctx.clone();
        async move { engine.run(ctx).await }
    });
    tokio::time::sleep(Duration::from_millis(1550)).await;
    ctx.cancel();
    match running.await.unwrap() {
        Err(Error::Cancelled) => {}
        other => panic!("unexpected {other:?}"),
    }

    // Users start every 100ms and shoot on start and each second after.
    let shots = agg.seen().len();
    assert!(shots >= 16, "{shots}");
}
