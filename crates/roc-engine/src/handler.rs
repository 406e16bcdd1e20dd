//! `HandlerRegistry` and the dispatch policy that decides, for a brand
//! new RoC's opening command, whether a handler exists for it and runs
//! it (spec.md §4.6).
//!
//! Only the `(code, version)`-keyed `RequestMap.addHandler<Request>`
//! dispatch variant is implemented, per the Open Question resolution in
//! spec.md §9: the deprecated code-only and handler-function variants
//! are not built.

use crate::dispatcher::EventDispatcher;
use crate::resources::ResourceAcquirer;
use async_trait::async_trait;
use bytes::Bytes;
use roc_core::error::Result;
use roc_support::ByteCountHistogram;
use roc_wire::Command;
use std::collections::HashMap;
use std::sync::Mutex;

/// The contract a request handler satisfies. `handle` receives the copy
/// of the init payload the dispatch pipeline made before replying
/// `RequestSupported`, per the stability invariant in spec.md §3.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        roc: &EventDispatcher,
        resources: &mut ResourceAcquirer,
        init_payload: Bytes,
    ) -> Result<()>;
}

type HandlerFactory = Box<dyn Fn() -> Box<dyn RequestHandler> + Send + Sync>;

struct Registration {
    name: &'static str,
    factory: HandlerFactory,
    timing: bool,
    retired: bool,
}

/// Unconditional per-handler dispatch counters, spec.md §4.6 policy
/// step 5's "count request start/finish" plus its "additional counter"
/// for dispatches to a retired handler. Kept separate from `stats`
/// (which only fills in when a handler opts into timing) since these
/// three counts are expected for every handler regardless of that flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerCounters {
    pub started: u64,
    pub finished: u64,
    pub retired_dispatches: u64,
}

/// Immutable once built; shared by reference across every `Connection`
/// on the process, the way spec.md §3 describes it ("created at startup,
/// shared").
pub struct HandlerRegistry {
    entries: HashMap<Command, Registration>,
    supported_codes: std::collections::HashSet<u16>,
    stats: Mutex<HashMap<&'static str, ByteCountHistogram>>,
    counters: Mutex<HashMap<&'static str, HandlerCounters>>,
}

/// Builds an immutable `HandlerRegistry`. There is no remove; a
/// registry is assembled once at startup and handed to every connection
/// as a shared, read-only table.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    entries: HashMap<Command, Registration>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(
        mut self,
        command: Command,
        name: &'static str,
        timing: bool,
        retired: bool,
        factory: impl Fn() -> Box<dyn RequestHandler> + Send + Sync + 'static,
    ) -> Self {
        self.entries.insert(
            command,
            Registration {
                name,
                factory: Box::new(factory),
                timing,
                retired,
            },
        );
        self
    }

    pub fn build(self) -> HandlerRegistry {
        let supported_codes = self.entries.keys().map(|c| c.code).collect();
        HandlerRegistry {
            entries: self.entries,
            supported_codes,
            stats: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }
}

/// Node's reply to the opening command on a request id, per spec.md §4.6
/// policy steps 2-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler found; the RoC should run it.
    Supported,
    /// `code` is outside the supported set.
    NotSupported,
    /// `code` is supported but not at this `version`.
    VersionNotSupported,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Classifies a `Command`, steps 2-3 of spec.md §4.6's policy.
    pub fn classify(&self, command: Command) -> DispatchOutcome {
        if !self.supported_codes.contains(&command.code) {
            return DispatchOutcome::NotSupported;
        }
        if self.entries.contains_key(&command) {
            DispatchOutcome::Supported
        } else {
            DispatchOutcome::VersionNotSupported
        }
    }

    /// Materialises a fresh handler for `command`. Only meaningful after
    /// `classify` returned `Supported`.
    pub fn instantiate(&self, command: Command) -> Option<Box<dyn RequestHandler>> {
        self.entries.get(&command).map(|reg| (reg.factory)())
    }

    pub fn name_of(&self, command: Command) -> Option<&'static str> {
        self.entries.get(&command).map(|reg| reg.name)
    }

    pub fn is_timed(&self, command: Command) -> bool {
        self.entries.get(&command).map(|reg| reg.timing).unwrap_or(false)
    }

    pub fn is_retired(&self, command: Command) -> bool {
        self.entries.get(&command).map(|reg| reg.retired).unwrap_or(false)
    }

    /// Records one request's wall-clock duration against its handler's
    /// named histogram, step 5 of spec.md §4.6's policy.
    pub fn record_timing(&self, name: &'static str, micros: u64) {
        self.stats
            .lock()
            .unwrap()
            .entry(name)
            .or_default()
            .observe(micros);
    }

    pub fn histogram_snapshot(&self, name: &str) -> Option<ByteCountHistogram> {
        self.stats.lock().unwrap().get(name).cloned()
    }

    /// Counted unconditionally (unlike `record_timing`) around every
    /// handler invocation, step 5 of spec.md §4.6's policy.
    pub fn record_started(&self, name: &'static str) {
        self.counters.lock().unwrap().entry(name).or_default().started += 1;
    }

    pub fn record_finished(&self, name: &'static str) {
        self.counters.lock().unwrap().entry(name).or_default().finished += 1;
    }

    /// The "additional counter" spec.md §4.6 asks for on top of the
    /// retired-handler warning log.
    pub fn record_retired_dispatch(&self, name: &'static str) {
        self.counters.lock().unwrap().entry(name).or_default().retired_dispatches += 1;
    }

    pub fn counters_snapshot(&self, name: &str) -> Option<HandlerCounters> {
        self.counters.lock().unwrap().get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceAcquirer;
    use crate::free_list::FreeList;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(
            &self,
            _roc: &EventDispatcher,
            _resources: &mut ResourceAcquirer,
            _init_payload: Bytes,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn build_registry() -> HandlerRegistry {
        HandlerRegistry::builder()
            .add_handler(Command { code: 1, version: 0 }, "echo", true, false, || Box::new(Echo))
            .build()
    }

    #[test]
    fn unsupported_code_is_classified_not_supported() {
        let registry = build_registry();
        let outcome = registry.classify(Command { code: 2, version: 0 });
        assert_eq!(outcome, DispatchOutcome::NotSupported);
    }

    #[test]
    fn unsupported_version_is_classified_version_not_supported() {
        let registry = build_registry();
        let outcome = registry.classify(Command { code: 1, version: 5 });
        assert_eq!(outcome, DispatchOutcome::VersionNotSupported);
    }

    #[test]
    fn supported_command_instantiates_a_handler() {
        let registry = build_registry();
        let command = Command { code: 1, version: 0 };
        assert_eq!(registry.classify(command), DispatchOutcome::Supported);
        assert!(registry.instantiate(command).is_some());
    }

    #[test]
    fn counters_accumulate_per_handler_name() {
        let registry = build_registry();
        registry.record_started("echo");
        registry.record_started("echo");
        registry.record_finished("echo");
        registry.record_retired_dispatch("echo");

        let counters = registry.counters_snapshot("echo").unwrap();
        assert_eq!(counters.started, 2);
        assert_eq!(counters.finished, 1);
        assert_eq!(counters.retired_dispatches, 1);
        assert!(registry.counters_snapshot("nonexistent").is_none());
    }

    #[tokio::test]
    async fn handler_runs_with_resources_in_scope() {
        let registry = build_registry();
        let command = Command { code: 1, version: 0 };
        let handler = registry.instantiate(command).unwrap();
        let (_entry, dispatcher) = crate::dispatcher::new_roc(
            roc_wire::RequestId(1),
            tokio::sync::mpsc::unbounded_channel().0,
            std::time::Instant::now(),
        );
        let mut resources = ResourceAcquirer::new(Arc::new(FreeList::new()));
        handler
            .handle(&dispatcher, &mut resources, Bytes::from_static(b"init"))
            .await
            .unwrap();
    }
}
