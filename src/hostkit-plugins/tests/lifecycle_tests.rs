//! Integration tests for the plugin lifecycle: register → start → load → remove.
//!
//! Covers:
//! - Successful and stalled starts
//! - Duplicate and failed registrations (including what gets logged)
//! - Removal, re-registration and shutdown ordering
//! - Re-entrant registry use from lifecycle hooks

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

use hostkit_plugins::{
    Command, CommandResult, Plugin, PluginContext, PluginDescriptor, PluginRegistry, PluginState,
    StaticConfig,
};

// =============================================================================
// Test Helpers
// =============================================================================

type Journal = Arc<Mutex<Vec<String>>>;

/// A plugin that records every lifecycle call it receives.
struct MockPlugin {
    name: String,
    start_ok: bool,
    stop_ok: bool,
    journal: Journal,
}

impl MockPlugin {
    fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            start_ok: true,
            stop_ok: true,
            journal: journal.clone(),
        }
    }

    fn stalling(mut self) -> Self {
        self.start_ok = false;
        self
    }

    fn failing_stop(mut self) -> Self {
        self.stop_ok = false;
        self
    }

    fn record(&self, what: &str) {
        self.journal.lock().push(format!("{}:{}", self.name, what));
    }
}

impl Plugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn commands(&self) -> Vec<Command> {
        let name = self.name.clone();
        vec![
            Command::new(format!("{}-hello", self.name))
                .with_description("Say hello")
                .with_handler(move |_, _, _| Ok(CommandResult::message(format!("hello from {name}")))),
        ]
    }

    fn on_start(&self, _ctx: &PluginContext) -> bool {
        self.record("start");
        self.start_ok
    }

    fn on_loaded(&self, _ctx: &PluginContext) {
        self.record("loaded");
    }

    fn on_stop(&self) -> bool {
        self.record("stop");
        self.stop_ok
    }
}

/// Counts error events, and separately the ones flagged `fatal`.
#[derive(Clone, Default)]
struct ErrorCounter {
    errors: Arc<AtomicUsize>,
    fatal: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::ERROR {
            return;
        }
        self.errors.fetch_add(1, Ordering::SeqCst);
        if event.metadata().fields().field("fatal").is_some() {
            self.fatal.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn with_error_counter<R>(f: impl FnOnce() -> R) -> (R, ErrorCounter) {
    let counter = ErrorCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, counter)
}

fn new_registry() -> Arc<PluginRegistry> {
    PluginRegistry::new(Arc::new(StaticConfig::new("lifecycle-tests")))
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_register_runs_hooks_once() {
    let registry = new_registry();
    let journal = journal();
    let j = journal.clone();

    registry.register_plugin(
        "mod.alpha",
        PluginDescriptor::new(move |_ctx| Ok(MockPlugin::new("alpha", &j))),
    );

    assert!(registry.has_plugin("alpha"));
    assert_eq!(registry.get_instance("Alpha").map(|p| p.name().to_string()), Some("alpha".into()));
    assert_eq!(registry.plugin_state("alpha"), Some(PluginState::Loaded));
    assert_eq!(*journal.lock(), vec!["alpha:start", "alpha:loaded"]);
}

#[test]
fn test_factory_receives_module_context() {
    let registry = new_registry();
    let seen = Arc::new(Mutex::new(None));
    let seen_in_factory = seen.clone();
    let journal = journal();

    registry.register_plugin(
        "mod.ctx",
        PluginDescriptor::new(move |ctx: PluginContext| {
            *seen_in_factory.lock() = Some(ctx.module_id().to_string());
            Ok(MockPlugin::new("ctx", &journal))
        }),
    );

    assert_eq!(seen.lock().as_deref(), Some("mod.ctx"));
}

#[test]
fn test_duplicate_registration_logs_one_error() {
    let registry = new_registry();
    let journal = journal();
    let j = journal.clone();
    let descriptor = PluginDescriptor::new(move |_ctx| Ok(MockPlugin::new("alpha", &j)));

    registry.register_plugin("mod.alpha", descriptor.clone());
    let before = registry.list_status();

    let (_, counter) = with_error_counter(|| registry.register_plugin("mod.alpha", descriptor));

    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
    assert_eq!(counter.fatal.load(Ordering::SeqCst), 0);
    assert_eq!(registry.plugin_count(), 1);
    assert_eq!(registry.list_status()[0].registered_at, before[0].registered_at);
    // the second attempt never reached the factory
    assert_eq!(*journal.lock(), vec!["alpha:start", "alpha:loaded"]);
}

#[test]
fn test_instantiation_failure_is_fatal_and_leaves_no_trace() {
    let registry = new_registry();

    let (_, counter) = with_error_counter(|| {
        registry.register_plugin(
            "mod.broken",
            PluginDescriptor::new(|_ctx| -> anyhow::Result<MockPlugin> {
                anyhow::bail!("missing resource")
            }),
        )
    });

    assert_eq!(counter.fatal.load(Ordering::SeqCst), 1);
    assert_eq!(registry.plugin_count(), 0);
    assert!(registry.installed_modules().is_empty());
}

#[test]
fn test_stalled_plugin_stays_listed() {
    let registry = new_registry();
    let journal = journal();

    registry.register_instance("mod.slow", Arc::new(MockPlugin::new("slow", &journal).stalling()));

    assert!(registry.has_plugin("slow"));
    assert_eq!(registry.plugin_state("slow"), Some(PluginState::Stalled));
    assert_eq!(*journal.lock(), vec!["slow:start"]);

    let err = registry.execute_command(None, "slow-hello", &[]).unwrap_err();
    assert_eq!(err.missing_tag(), Some("slow-hello"));
    assert!(registry.get_all_commands().iter().any(|c| c.tag == "slow-hello"));
}

#[test]
fn test_duplicate_plugin_name_rejected() {
    let registry = new_registry();
    let journal = journal();

    registry.register_instance("mod.one", Arc::new(MockPlugin::new("twin", &journal)));
    let (_, counter) = with_error_counter(|| {
        registry.register_instance("mod.two", Arc::new(MockPlugin::new("TWIN", &journal)))
    });

    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
    assert_eq!(registry.plugin_count(), 1);
    assert!(registry.get_instance_by_module("mod.two").is_none());
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn test_remove_unknown_module() {
    let registry = new_registry();
    let journal = journal();
    registry.register_instance("mod.alpha", Arc::new(MockPlugin::new("alpha", &journal)));

    assert!(!registry.remove_plugin("mod.unknown"));
    assert_eq!(registry.plugin_count(), 1);
    assert_eq!(registry.installed_modules(), vec!["mod.alpha"]);
    assert!(!journal.lock().iter().any(|e| e.ends_with(":stop")));
}

#[test]
fn test_remove_reports_stop_result() {
    let registry = new_registry();
    let journal = journal();
    registry.register_instance("mod.ok", Arc::new(MockPlugin::new("ok", &journal)));
    registry.register_instance(
        "mod.stubborn",
        Arc::new(MockPlugin::new("stubborn", &journal).failing_stop()),
    );

    assert!(registry.remove_plugin("mod.ok"));
    assert!(!registry.remove_plugin("mod.stubborn"));

    // removal happens even when on_stop reports failure
    assert_eq!(registry.plugin_count(), 0);
    assert!(!registry.has_plugin("stubborn"));
    assert!(registry.resolve("stubborn-hello").is_err());
}

#[test]
fn test_register_again_after_removal() {
    let registry = new_registry();
    let journal = journal();
    let j = journal.clone();
    let descriptor = PluginDescriptor::new(move |_ctx| Ok(MockPlugin::new("alpha", &j)));

    registry.register_plugin("mod.alpha", descriptor.clone());
    assert!(registry.remove_plugin("mod.alpha"));
    registry.register_plugin("mod.alpha", descriptor);

    assert!(registry.has_plugin("alpha"));
    assert_eq!(journal.lock().iter().filter(|e| *e == "alpha:loaded").count(), 2);
}

#[test]
fn test_shutdown_stops_in_reverse_order() {
    let registry = new_registry();
    let journal = journal();
    for name in ["first", "second", "third"] {
        registry.register_instance(format!("mod.{name}"), Arc::new(MockPlugin::new(name, &journal)));
    }
    journal.lock().clear();

    let results = registry.shutdown();

    assert_eq!(*journal.lock(), vec!["third:stop", "second:stop", "first:stop"]);
    assert!(results.iter().all(|(_, stopped)| *stopped));
    assert_eq!(results[0].0, "mod.third");
    assert_eq!(registry.plugin_count(), 0);
}

// =============================================================================
// Re-entrancy
// =============================================================================

/// Runs another plugin's command and registers a helper while starting.
struct BootstrapPlugin {
    journal: Journal,
}

impl Plugin for BootstrapPlugin {
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn commands(&self) -> Vec<Command> {
        Vec::new()
    }

    fn on_start(&self, ctx: &PluginContext) -> bool {
        let greeting = match ctx.execute_command("alpha-hello", &[] as &[&str]) {
            Ok(result) => result.message,
            Err(e) => e.to_string(),
        };
        self.journal.lock().push(greeting);

        let Some(registry) = ctx.registry() else {
            return false;
        };
        registry.register_instance("mod.helper", Arc::new(MockPlugin::new("helper", &self.journal)));
        true
    }
}

#[test]
fn test_hooks_may_use_the_registry() {
    let registry = new_registry();
    let journal = journal();
    registry.register_instance("mod.alpha", Arc::new(MockPlugin::new("alpha", &journal)));
    journal.lock().clear();

    registry.register_instance(
        "mod.bootstrap",
        Arc::new(BootstrapPlugin {
            journal: journal.clone(),
        }),
    );

    assert_eq!(
        *journal.lock(),
        vec!["hello from alpha", "helper:start", "helper:loaded"]
    );
    assert_eq!(registry.plugin_state("bootstrap"), Some(PluginState::Loaded));
    assert!(registry.has_plugin("helper"));
}

/// Reads the registry while building its command list.
struct Introspective {
    ctx: PluginContext,
}

impl Plugin for Introspective {
    fn name(&self) -> &str {
        "introspective"
    }

    fn commands(&self) -> Vec<Command> {
        let peers = self.ctx.registry().map(|r| r.plugin_count()).unwrap_or(0);
        vec![Command::new("peers").with_description(format!("{peers} plugin(s) at startup"))]
    }

    fn on_start(&self, _ctx: &PluginContext) -> bool {
        true
    }
}

#[test]
fn test_commands_may_query_the_registry() {
    let registry = new_registry();
    let journal = journal();
    registry.register_instance("mod.alpha", Arc::new(MockPlugin::new("alpha", &journal)));

    let (tx, rx) = mpsc::channel();
    let worker = registry.clone();
    std::thread::spawn(move || {
        worker.register_plugin(
            "mod.introspective",
            PluginDescriptor::new(|ctx| Ok(Introspective { ctx })),
        );
        let _ = tx.send(());
    });

    rx.recv_timeout(Duration::from_secs(3))
        .expect("registration did not finish");
    assert!(registry.has_plugin("introspective"));
    assert_eq!(registry.resolve("peers").unwrap().summary(), "1 plugin(s) at startup");
}

/// Removes itself from the registry during `on_start`.
struct SelfRemoving {
    loaded: AtomicUsize,
    stopped: AtomicUsize,
}

impl Plugin for SelfRemoving {
    fn name(&self) -> &str {
        "self-removing"
    }

    fn commands(&self) -> Vec<Command> {
        vec![Command::new("vanish")]
    }

    fn on_start(&self, ctx: &PluginContext) -> bool {
        if let Some(registry) = ctx.registry() {
            registry.remove_plugin(ctx.module_id());
        }
        true
    }

    fn on_loaded(&self, _ctx: &PluginContext) {
        self.loaded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stop(&self) -> bool {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[test]
fn test_plugin_removed_during_start_is_not_loaded() {
    let registry = new_registry();
    let plugin = Arc::new(SelfRemoving {
        loaded: AtomicUsize::new(0),
        stopped: AtomicUsize::new(0),
    });

    registry.register_instance("mod.vanish", plugin.clone());

    assert_eq!(plugin.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(plugin.loaded.load(Ordering::SeqCst), 0);
    assert_eq!(registry.plugin_count(), 0);
    assert!(registry.installed_modules().is_empty());
    assert!(registry.resolve("vanish").is_err());
}

/// Panics in `on_start` the first time only.
struct PanicsOnce {
    panicked: AtomicBool,
}

impl Plugin for PanicsOnce {
    fn name(&self) -> &str {
        "flaky"
    }

    fn commands(&self) -> Vec<Command> {
        vec![Command::new("flaky-run")]
    }

    fn on_start(&self, _ctx: &PluginContext) -> bool {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("start failed");
        }
        true
    }
}

#[test]
fn test_panicking_start_rolls_back_registration() {
    let registry = new_registry();
    let plugin = Arc::new(PanicsOnce {
        panicked: AtomicBool::new(false),
    });

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        registry.register_instance("mod.flaky", plugin.clone())
    }));

    assert!(outcome.is_err());
    assert_eq!(registry.plugin_count(), 0);
    assert!(registry.installed_modules().is_empty());
    assert!(registry.get_all_commands().is_empty());

    registry.register_instance("mod.flaky", plugin);
    assert_eq!(registry.plugin_state("flaky"), Some(PluginState::Loaded));
    assert!(registry.resolve("flaky-run").is_ok());
}
