#![cfg(feature = "runtime-tokio")]

use std::{
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use bytes::Bytes;
use stagehand::{
    ActionBridge, Attachment, GateEntry, GenerationId, HarnessConfig, HarnessError, HostContext,
    HostEnvironment, Hosted, Launcher, LifecycleState, Scenario, Step, ThemeId, TokioHost,
    Waiting,
};
use tracing_subscriber::EnvFilter;

type Journal = Arc<Mutex<Vec<(GenerationId, Step)>>>;

/// Records every hook it receives, then reports like a well-behaved instance
struct Recorder {
    journal: Journal,
    payload: Option<Bytes>,
    theme: Option<ThemeId>,
}

impl Recorder {
    fn record(&self, host: &HostContext, step: Step) {
        self.journal
            .lock()
            .unwrap()
            .push((host.generation(), step));
        host.report(step.target());
    }
}

impl Hosted for Recorder {
    fn on_create(&mut self, host: &HostContext) {
        self.theme = host.theme();
        self.record(host, Step::Create);
    }
    fn on_start(&mut self, host: &HostContext) {
        self.record(host, Step::Start);
    }
    fn on_resume(&mut self, host: &HostContext) {
        self.record(host, Step::Resume);
    }
    fn on_pause(&mut self, host: &HostContext) {
        self.record(host, Step::Pause);
    }
    fn on_stop(&mut self, host: &HostContext) {
        self.record(host, Step::Stop);
    }
    fn on_destroy(&mut self, host: &HostContext) {
        self.record(host, Step::Destroy);
    }
}

fn recorder() -> (Launcher<Recorder>, Journal) {
    let journal = Journal::default();
    let shared = journal.clone();
    let launcher = Launcher::new(move |payload| {
        Ok(Recorder {
            journal: shared.clone(),
            payload: payload.cloned(),
            theme: None,
        })
    });
    (launcher, journal)
}

fn steps(journal: &Journal) -> Vec<Step> {
    journal.lock().unwrap().iter().map(|&(_, step)| step).collect()
}

#[test]
fn launch_recreate_destroy() -> anyhow::Result<()> {
    let _guard = subscribe();
    let (launcher, journal) = recorder();
    let scenario = launcher.launch()?;
    assert_eq!(scenario.state(), LifecycleState::Resumed);
    assert_eq!(scenario.recreation_count(), 0);
    assert_eq!(scenario.generation(), GenerationId(0));
    assert_eq!(steps(&journal), [Step::Create, Step::Start, Step::Resume]);

    scenario.move_to_state(LifecycleState::Created)?;
    assert_eq!(scenario.state(), LifecycleState::Created);

    scenario.recreate()?;
    assert_eq!(scenario.state(), LifecycleState::Created);
    assert_eq!(scenario.recreation_count(), 1);
    assert_eq!(scenario.generation(), GenerationId(1));

    scenario.move_to_state(LifecycleState::Destroyed)?;
    assert_eq!(scenario.state(), LifecycleState::Destroyed);
    assert!(matches!(
        scenario.move_to_state(LifecycleState::Resumed),
        Err(HarnessError::NoInstance)
    ));
    assert!(matches!(
        scenario.move_to_state(LifecycleState::Destroyed),
        Err(HarnessError::NoInstance)
    ));
    assert!(matches!(
        scenario.on_instance(|_| ()),
        Err(HarnessError::NoInstance)
    ));

    let log = journal.lock().unwrap().clone();
    assert_eq!(
        log,
        [
            (GenerationId(0), Step::Create),
            (GenerationId(0), Step::Start),
            (GenerationId(0), Step::Resume),
            (GenerationId(0), Step::Pause),
            (GenerationId(0), Step::Stop),
            (GenerationId(0), Step::Destroy),
            (GenerationId(1), Step::Create),
            (GenerationId(1), Step::Destroy),
        ]
    );
    Ok(())
}

#[test]
fn every_target_from_every_state() {
    let _guard = subscribe();
    let targets = [
        LifecycleState::Created,
        LifecycleState::Started,
        LifecycleState::Resumed,
    ];
    for from in targets {
        for to in targets {
            let (launcher, _) = recorder();
            let scenario = launcher.initial_state(from).launch().unwrap();
            assert_eq!(scenario.state(), from);
            scenario.move_to_state(to).unwrap();
            assert_eq!(scenario.state(), to, "{from} -> {to}");
        }
        let (launcher, _) = recorder();
        let scenario = launcher.initial_state(from).launch().unwrap();
        scenario.move_to_state(LifecycleState::Destroyed).unwrap();
        assert_eq!(scenario.state(), LifecycleState::Destroyed);
    }
}

#[test]
fn no_path_back_to_initialized() {
    let _guard = subscribe();
    let (launcher, _) = recorder();
    let scenario = launcher.launch().unwrap();
    match scenario.move_to_state(LifecycleState::Initialized) {
        Err(HarnessError::UnsupportedTransition { from, to }) => {
            assert_eq!(from, LifecycleState::Resumed);
            assert_eq!(to, LifecycleState::Initialized);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(scenario.state(), LifecycleState::Resumed);
}

#[test]
fn repeated_move_is_idempotent() {
    let _guard = subscribe();
    let (launcher, journal) = recorder();
    let scenario = launcher.launch().unwrap();
    scenario.move_to_state(LifecycleState::Started).unwrap();
    let before = steps(&journal);
    scenario.move_to_state(LifecycleState::Started).unwrap();
    assert_eq!(scenario.state(), LifecycleState::Started);
    assert_eq!(steps(&journal), before);
}

#[test]
fn recreate_restores_prior_state() {
    let _guard = subscribe();
    for state in [
        LifecycleState::Created,
        LifecycleState::Started,
        LifecycleState::Resumed,
    ] {
        let (launcher, _) = recorder();
        let scenario = launcher.launch().unwrap();
        scenario.move_to_state(state).unwrap();
        for round in 1..=3 {
            scenario.recreate().unwrap();
            assert_eq!(scenario.state(), state);
            assert_eq!(scenario.recreation_count(), round);
        }
    }
}

#[test]
fn recreate_after_destroy_relaunches() {
    let _guard = subscribe();
    let (launcher, _) = recorder();
    let scenario = launcher.initial_state(LifecycleState::Started).launch().unwrap();
    scenario.move_to_state(LifecycleState::Destroyed).unwrap();
    scenario.recreate().unwrap();
    assert_eq!(scenario.state(), LifecycleState::Started);
    assert_eq!(scenario.recreation_count(), 1);
    assert!(scenario.is_live().unwrap());
}

#[test]
fn construction_arguments_survive_recreation() {
    let _guard = subscribe();
    let (launcher, _) = recorder();
    let scenario = launcher
        .payload(Bytes::from_static(b"args"))
        .theme(ThemeId(7))
        .launch()
        .unwrap();
    scenario.recreate().unwrap();
    let (payload, theme) = scenario
        .on_instance(|recorder| (recorder.payload.clone(), recorder.theme))
        .unwrap();
    assert_eq!(payload.as_deref(), Some(&b"args"[..]));
    assert_eq!(theme, Some(ThemeId(7)));
}

#[test]
fn attachment_follows_mode() {
    let _guard = subscribe();
    let (launcher, _) = recorder();
    let contained = launcher.attachment(Attachment::Contained).launch().unwrap();
    assert!(contained.is_attached().unwrap());

    contained.move_to_state(LifecycleState::Created).unwrap();
    assert!(!contained.is_attached().unwrap());
    contained.move_to_state(LifecycleState::Started).unwrap();
    assert!(contained.is_attached().unwrap());

    let (launcher, _) = recorder();
    let standalone = launcher.launch().unwrap();
    assert_eq!(standalone.attachment(), Attachment::Standalone);
    assert!(!standalone.is_attached().unwrap());
}

#[test]
fn failed_factory_leaves_no_instance() {
    let _guard = subscribe();
    let builds = Arc::new(Mutex::new(0));
    let counter = builds.clone();
    let scenario = Launcher::new(move |_| {
        let mut builds = counter.lock().unwrap();
        *builds += 1;
        if *builds > 1 {
            return Err("out of widgets".into());
        }
        Ok(Recorder {
            journal: Journal::default(),
            payload: None,
            theme: None,
        })
    })
    .launch()
    .unwrap();

    match scenario.recreate() {
        Err(HarnessError::Factory(e)) => assert_eq!(e.to_string(), "out of widgets"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(scenario.recreation_count(), 0);
    assert!(!scenario.is_live().unwrap());
    assert!(matches!(
        scenario.move_to_state(LifecycleState::Resumed),
        Err(HarnessError::NoInstance)
    ));
    assert!(matches!(scenario.recreate(), Err(HarnessError::NoInstance)));
    scenario.close();
}

#[test]
fn launch_factory_error() {
    let _guard = subscribe();
    let result = Scenario::<Recorder>::launch(|_| Err("no display".into()));
    assert!(matches!(result, Err(HarnessError::Factory(_))));
}

#[test]
fn policy_gates_entry_into_started() {
    let _guard = subscribe();
    let mut config = HarnessConfig::default();
    config.policy(Arc::new(GateEntry::new(LifecycleState::Started, 27, 28)));
    let config = Arc::new(config);

    let (launcher, journal) = recorder();
    match launcher.config(config.clone()).launch() {
        Err(HarnessError::UnsupportedTransition { from, to }) => {
            assert_eq!(from, LifecycleState::Created);
            assert_eq!(to, LifecycleState::Started);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    // The rejected step never ran; dropping the scenario tore the instance down
    assert_eq!(steps(&journal), [Step::Create, Step::Destroy]);

    let (launcher, journal) = recorder();
    let scenario = launcher
        .config(config)
        .initial_state(LifecycleState::Created)
        .launch()
        .unwrap();
    assert!(matches!(
        scenario.move_to_state(LifecycleState::Resumed),
        Err(HarnessError::UnsupportedTransition { .. })
    ));
    assert_eq!(scenario.state(), LifecycleState::Created);

    // Recreation still tears down and rebuilds to the prior state
    scenario.recreate().unwrap();
    assert_eq!(scenario.state(), LifecycleState::Created);
    scenario.close();
    assert_eq!(
        steps(&journal),
        [
            Step::Create,
            Step::Destroy,
            Step::Create,
            Step::Destroy
        ]
    );
}

#[test]
fn close_is_idempotent() {
    let _guard = subscribe();
    let (launcher, journal) = recorder();
    let scenario = launcher.launch().unwrap();
    scenario.close();
    scenario.close();
    assert_eq!(scenario.state(), LifecycleState::Destroyed);
    assert!(matches!(scenario.recreate(), Err(HarnessError::NoInstance)));
    drop(scenario);
    assert_eq!(
        steps(&journal).iter().filter(|&&s| s == Step::Destroy).count(),
        1
    );
}

#[test]
fn calls_from_host_thread_deadlock() {
    let _guard = subscribe();
    let (launcher, _) = recorder();
    let scenario = Arc::new(launcher.launch().unwrap());
    let inner = scenario.clone();
    let nested = scenario
        .on_instance(move |_| inner.move_to_state(LifecycleState::Created))
        .unwrap();
    assert!(matches!(nested, Err(HarnessError::Deadlock)));
    assert_eq!(scenario.state(), LifecycleState::Resumed);
}

#[test]
fn on_instance_generation_fixed_during_racing_recreate() {
    let _guard = subscribe();
    let (launcher, journal) = recorder();
    let scenario = Arc::new(launcher.launch().unwrap());
    let (entered_tx, entered_rx) = mpsc::channel();

    let racer = {
        let scenario = scenario.clone();
        thread::spawn(move || {
            entered_rx.recv().unwrap();
            scenario.recreate().unwrap();
        })
    };

    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let seen = scenario
        .on_instance(move |recorder| {
            *counter.lock().unwrap() += 1;
            entered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            let journal = recorder.journal.lock().unwrap();
            journal.last().map(|&(generation, _)| generation)
        })
        .unwrap();
    racer.join().unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(seen, Some(GenerationId(0)));
    assert_eq!(scenario.generation(), GenerationId(1));
    assert_eq!(scenario.state(), LifecycleState::Resumed);
    assert!(journal
        .lock()
        .unwrap()
        .contains(&(GenerationId(1), Step::Resume)));
}

#[test]
fn scenarios_share_the_default_host() {
    let _guard = subscribe();
    let handles = (0..4)
        .map(|_| {
            thread::spawn(|| {
                let (launcher, _) = recorder();
                let scenario = launcher.launch().unwrap();
                for _ in 0..5 {
                    scenario.move_to_state(LifecycleState::Created).unwrap();
                    scenario.recreate().unwrap();
                    scenario.move_to_state(LifecycleState::Resumed).unwrap();
                }
                scenario.recreation_count()
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5);
    }
}

#[test]
fn dedicated_host() {
    let _guard = subscribe();
    let host = Arc::new(TokioHost::spawn().unwrap());
    let (launcher, _) = recorder();
    let scenario = launcher.host(host).launch().unwrap();
    assert_eq!(scenario.state(), LifecycleState::Resumed);
}

#[test]
fn wedged_host_times_out_operations() {
    let _guard = subscribe();
    let host = Arc::new(TokioHost::spawn().unwrap());
    let mut config = HarnessConfig::default();
    config.action_timeout(Duration::from_millis(50)).unwrap();
    let (launcher, _) = recorder();
    let scenario = launcher
        .host(host.clone())
        .config(Arc::new(config))
        .launch()
        .unwrap();

    host.post(Box::new(|| thread::sleep(Duration::from_millis(400))));
    match scenario.move_to_state(LifecycleState::Created) {
        Err(HarnessError::Timeout(Waiting::Action("pause"))) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(scenario.state(), LifecycleState::Resumed);
    match scenario.recreate() {
        Err(HarnessError::Timeout(Waiting::Action("pause"))) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(scenario.recreation_count(), 0);
    assert_eq!(scenario.generation(), GenerationId(0));

    // Once the host catches up the queued steps land and the scenario is usable again
    ActionBridge::new(host, Duration::from_secs(5))
        .run("flush", || ())
        .unwrap();
    assert_eq!(scenario.state(), LifecycleState::Started);
    scenario.move_to_state(LifecycleState::Created).unwrap();
    scenario.recreate().unwrap();
    assert_eq!(scenario.state(), LifecycleState::Created);
    assert_eq!(scenario.recreation_count(), 1);
}

/// Panics the first time it is stopped
struct Fragile {
    panicked: bool,
}

impl Hosted for Fragile {
    fn on_stop(&mut self, host: &HostContext) {
        if !self.panicked {
            self.panicked = true;
            panic!("stop failed");
        }
        host.report(LifecycleState::Created);
    }
}

#[test]
fn panicking_hook_leaves_last_confirmed_state() {
    let _guard = subscribe();
    let scenario = Launcher::new(|_| Ok(Fragile { panicked: false }))
        .launch()
        .unwrap();

    match scenario.move_to_state(LifecycleState::Created) {
        Err(HarnessError::ActionPanicked(message)) => assert_eq!(message, "stop failed"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(scenario.state(), LifecycleState::Started);
    assert!(scenario.is_live().unwrap());
    assert!(scenario.on_instance(|fragile| fragile.panicked).unwrap());

    scenario.move_to_state(LifecycleState::Created).unwrap();
    assert_eq!(scenario.state(), LifecycleState::Created);
}

fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(sub)
}
