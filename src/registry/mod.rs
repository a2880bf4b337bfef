/*!
 * Processor registry / PROCS
 *
 * The process-wide directory of registered descriptors and live
 * instances. Guarded by one `parking_lot::RwLock` per collection, with
 * a strict lock-ordering discipline: registry guards are always taken
 * before any instance's fair locks, never the reverse — the same
 * read-mostly registry pattern as `process::ProcessManager`,
 * generalized here to two collections instead of one.
 */

use crate::core::errors::{MpResult, Status};
use crate::core::types::ProcId;
use crate::descriptor::ProcessorDescriptor;
use crate::fifo::queue::Wait;
use crate::frame::Frame;
use crate::processor::{FifoSizes, ProcessorInstance};
use crate::settings::{self, SettingsTree};

use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registry option-tag string constants consumed by a
/// `module_opt`-style control surface. Kept as a plain
/// namespace of `&'static str` consts rather than an enum since callers
/// pass them across a text boundary (matching `OpenFlags`-style plain
/// structs elsewhere in this crate rather than reaching for a new
/// abstraction).
pub struct OptTag;

impl OptTag {
    pub const REGISTER_TYPE: &'static str = "PROCS_REGISTER_TYPE";
    pub const UNREGISTER_TYPE: &'static str = "PROCS_UNREGISTER_TYPE";
    pub const GET_TYPE: &'static str = "PROCS_GET_TYPE";
    pub const POST: &'static str = "PROCS_POST";
    pub const ID_DELETE: &'static str = "PROCS_ID_DELETE";
    pub const ID_PUT: &'static str = "PROCS_ID_PUT";
    pub const ID_GET: &'static str = "PROCS_ID_GET";
    /// Key of `PROCS_POST`'s structured response, holding the new id.
    pub const POST_RESPONSE_PROC_ID: &'static str = "proc_id";
}

/// Reserved `id_put` key that requests swapping an instance's
/// descriptor while preserving its id and settings.
const PROC_NAME_KEY: &str = "proc_name";

/// Builder-constructed registry configuration, in the same style as
/// `process::ProcessManagerBuilder`.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    default_fifo_sizes: FifoSizes,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig { default_fifo_sizes: FifoSizes::default() }
    }
}

impl RegistryConfig {
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryConfigBuilder {
    default_fifo_sizes: Option<FifoSizes>,
}

impl RegistryConfigBuilder {
    pub fn default_fifo_sizes(mut self, sizes: FifoSizes) -> Self {
        self.default_fifo_sizes = Some(sizes);
        self
    }

    pub fn build(self) -> RegistryConfig {
        RegistryConfig {
            default_fifo_sizes: self.default_fifo_sizes.unwrap_or_default(),
        }
    }
}

/// The process-wide directory of registered `ProcessorDescriptor`s and
/// live `ProcessorInstance`s.
pub struct ProcessorRegistry {
    descriptors: RwLock<HashMap<String, Arc<ProcessorDescriptor>>>,
    instances: RwLock<HashMap<ProcId, Arc<ProcessorInstance>>>,
    next_id: AtomicU64,
    config: RegistryConfig,
}

impl ProcessorRegistry {
    /// Creates and initializes a registry instance (`open_registry`).
    pub fn open_registry(config: RegistryConfig) -> ProcessorRegistry {
        ProcessorRegistry {
            descriptors: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    /// Tears the registry down: closes and drops every live instance.
    /// `Drop` also calls this, so an explicit call is only needed when
    /// the caller wants teardown to happen before the registry's own
    /// lifetime ends.
    pub fn close_registry(&self) {
        let mut instances = self.instances.write();
        for (id, instance) in instances.drain() {
            if let Err(e) = instance.close() {
                warn!("error closing instance {id} during registry shutdown: {e}");
            }
        }
        info!("registry closed");
    }

    /// Duplicates `descriptor` into the registry. Fails with `Conflict`
    /// if the name is already registered.
    pub fn register_type(&self, descriptor: ProcessorDescriptor) -> MpResult<()> {
        let mut descriptors = self.descriptors.write();
        if descriptors.contains_key(descriptor.name()) {
            return Err(Status::Conflict(format!(
                "processor type '{}' is already registered",
                descriptor.name()
            )));
        }
        let name = descriptor.name().to_string();
        descriptors.insert(name.clone(), Arc::new(descriptor.duplicate()));
        info!("registered processor type '{name}'");
        Ok(())
    }

    /// Removes a registered descriptor by name. New instantiations
    /// with that name then fail with `NotFound`.
    pub fn unregister_type(&self, name: &str) -> MpResult<()> {
        let mut descriptors = self.descriptors.write();
        if descriptors.remove(name).is_none() {
            return Err(Status::NotFound(format!("processor type '{name}' is not registered")));
        }
        info!("unregistered processor type '{name}'");
        Ok(())
    }

    /// Returns a duplicate of a registered descriptor, for
    /// `OptTag::GET_TYPE`-style introspection.
    pub fn get_type(&self, name: &str) -> MpResult<ProcessorDescriptor> {
        let descriptors = self.descriptors.read();
        descriptors
            .get(name)
            .map(|d| d.duplicate())
            .ok_or_else(|| Status::NotFound(format!("processor type '{name}' is not registered")))
    }

    /// Instantiates a registered processor type by name, assigning the
    /// next sequential id.
    pub fn post(&self, name: &str, initial_settings: &str) -> MpResult<ProcId> {
        let descriptor = {
            let descriptors = self.descriptors.read();
            descriptors
                .get(name)
                .cloned()
                .ok_or_else(|| Status::NotFound(format!("processor type '{name}' is not registered")))?
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = ProcessorInstance::open(id, descriptor, initial_settings, self.config.default_fifo_sizes)?;

        self.instances.write().insert(id, Arc::new(instance));
        info!("posted processor instance {id} of type '{name}'");
        Ok(id)
    }

    /// Pops the instance from the id map, then closes it — the
    /// removal-before-close order ensures no new caller can find it
    /// mid-teardown.
    pub fn delete(&self, id: ProcId) -> MpResult<()> {
        let instance = self
            .instances
            .write()
            .remove(&id)
            .ok_or_else(|| Status::NotFound(format!("no processor instance with id {id}")))?;
        instance.close()?;
        info!("deleted processor instance {id}");
        Ok(())
    }

    fn instance(&self, id: ProcId) -> MpResult<Arc<ProcessorInstance>> {
        self.instances
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Status::NotFound(format!("no processor instance with id {id}")))
    }

    /// Forwards to the instance's settings PUT, except for the
    /// reserved `proc_name` key, which swaps the instance's descriptor
    /// in place while preserving its id and settings.
    pub fn id_put(&self, id: ProcId, text: &str) -> MpResult<()> {
        let tree = settings::parse_flat_or_json(text)?;
        if let Some(new_name) = tree.get(PROC_NAME_KEY).and_then(|v| v.as_str()) {
            return self.swap_proc_name(id, new_name);
        }
        self.instance(id)?.put_settings(text)
    }

    /// `id_put`'s `proc_name` handler: a full instance close and
    /// reopen under a registry-wide write guard.
    fn swap_proc_name(&self, id: ProcId, new_name: &str) -> MpResult<()> {
        let mut instances = self.instances.write();
        let old = instances
            .get(&id)
            .cloned()
            .ok_or_else(|| Status::NotFound(format!("no processor instance with id {id}")))?;
        let new_descriptor = {
            let descriptors = self.descriptors.read();
            descriptors
                .get(new_name)
                .cloned()
                .ok_or_else(|| Status::NotFound(format!("processor type '{new_name}' is not registered")))?
        };

        let snapshot = old.snapshot_settings()?;
        old.close()?;
        let replay = settings::to_json_text(&snapshot);

        let new_instance = ProcessorInstance::open(id, new_descriptor, &replay, self.config.default_fifo_sizes)?;
        instances.insert(id, Arc::new(new_instance));
        info!("processor instance {id} swapped to type '{new_name}'");
        Ok(())
    }

    /// Forwards to the instance's settings GET.
    pub fn id_get(&self, id: ProcId) -> MpResult<SettingsTree> {
        self.instance(id)?.get_settings()
    }

    /// Thin forwarder: acquires the instance under the read guard, then
    /// pushes the frame into its input FIFO.
    pub fn id_send_frame(&self, id: ProcId, frame: Frame) -> MpResult<()> {
        self.instance(id)?.send_frame(frame)
    }

    /// Thin forwarder: acquires the instance under the read guard, then
    /// pulls a frame from its output FIFO.
    pub fn id_recv_frame(&self, id: ProcId, wait: Wait) -> MpResult<Frame> {
        self.instance(id)?.recv_frame(wait)
    }
}

impl Drop for ProcessorRegistry {
    fn drop(&mut self) {
        self.close_registry();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Callbacks, FeatureFlags, ProcessOutcome, ProcessorDescriptor, ProcessorState};
    use crate::fifo::Fifo;
    use crate::frame::{Frame, PlaneInput, SampleFormat};
    use crate::settings::{SettingsTree, Value};
    use std::time::Duration;

    #[derive(Default)]
    struct BypassState {
        setting1: i64,
    }

    struct BypassCallbacks;

    impl Callbacks for BypassCallbacks {
        fn open(&self) -> MpResult<ProcessorState> {
            Ok(Box::new(BypassState::default()))
        }
        fn close(&self, _state: ProcessorState) {}
        fn put_settings(&self, state: &mut ProcessorState, text: &str) -> MpResult<()> {
            let tree = settings::parse_flat_or_json(text)?;
            let s = state.downcast_mut::<BypassState>().unwrap();
            if let Some(v) = tree.get("setting1") {
                s.setting1 = v.as_i64().ok_or_else(|| Status::InvalidArgument("setting1 must be numeric".into()))?;
            }
            Ok(())
        }
        fn get_settings(&self, state: &ProcessorState) -> SettingsTree {
            let s = state.downcast_ref::<BypassState>().unwrap();
            let mut tree = SettingsTree::empty_object();
            tree.set("setting1", Value::Number(s.setting1 as f64));
            tree
        }
        fn process_frame(
            &self,
            _state: &mut ProcessorState,
            input: &Fifo<Frame>,
            output: &Fifo<Frame>,
        ) -> MpResult<ProcessOutcome> {
            match input.pull(Wait::Timeout(Duration::from_millis(50))) {
                Ok(frame) => {
                    output.push(frame)?;
                    Ok(ProcessOutcome::Success)
                }
                Err(Status::TryAgain) | Err(Status::TimedOut) => Ok(ProcessOutcome::TryAgain),
                Err(Status::EndOfFile) => Ok(ProcessOutcome::EndOfFile),
                Err(e) => Err(e),
            }
        }
    }

    fn bypass_descriptor(name: &str) -> ProcessorDescriptor {
        ProcessorDescriptor::new(
            name,
            "transform",
            "video/raw",
            FeatureFlags::ACCEPTS_READS | FeatureFlags::ACCEPTS_WRITES,
            Arc::new(BypassCallbacks),
        )
    }

    fn setting1_of(envelope: &SettingsTree) -> i64 {
        match envelope.get("settings").unwrap() {
            Value::Object(map) => map.get("setting1").unwrap().as_i64().unwrap(),
            other => panic!("expected settings object, got {other:?}"),
        }
    }

    #[test]
    fn register_unregister_then_register_again_succeeds() {
        let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
        registry.register_type(bypass_descriptor("bypass_processor")).unwrap();
        registry.unregister_type("bypass_processor").unwrap();
        registry.register_type(bypass_descriptor("bypass_processor")).unwrap();
    }

    #[test]
    fn post_then_delete_then_get_not_found() {
        let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
        registry.register_type(bypass_descriptor("bypass_processor")).unwrap();

        let id = registry.post("bypass_processor", "setting1=100").unwrap();
        assert_eq!(id, 0);

        registry.delete(id).unwrap();
        let err = registry.id_get(id).unwrap_err();
        assert!(matches!(err, Status::NotFound(_)));
    }

    #[test]
    fn settings_round_trip_through_put_and_get() {
        let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
        registry.register_type(bypass_descriptor("bypass_processor")).unwrap();
        let id = registry.post("bypass_processor", "setting1=100").unwrap();

        assert_eq!(setting1_of(&registry.id_get(id).unwrap()), 100);
        registry.id_put(id, "setting1=200").unwrap();
        assert_eq!(setting1_of(&registry.id_get(id).unwrap()), 200);
    }

    #[test]
    fn proc_name_swap_preserves_settings() {
        let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
        registry.register_type(bypass_descriptor("bypass_processor")).unwrap();
        registry.register_type(bypass_descriptor("bypass_processor2")).unwrap();

        let id = registry.post("bypass_processor", "setting1=200").unwrap();
        registry.id_put(id, "proc_name=bypass_processor2").unwrap();
        assert_eq!(setting1_of(&registry.id_get(id).unwrap()), 200);
    }

    #[test]
    fn unregistered_type_fails_post_with_not_found() {
        let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
        let err = registry.post("missing", "").unwrap_err();
        assert!(matches!(err, Status::NotFound(_)));
    }

    #[test]
    fn duplicate_registration_fails_with_conflict() {
        let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
        registry.register_type(bypass_descriptor("bypass_processor")).unwrap();
        let err = registry.register_type(bypass_descriptor("bypass_processor")).unwrap_err();
        assert!(matches!(err, Status::Conflict(_)));
    }

    #[test]
    fn frame_bypass_round_trip_through_registry() {
        let registry = ProcessorRegistry::open_registry(RegistryConfig::default());
        registry.register_type(bypass_descriptor("bypass_processor")).unwrap();
        let id = registry.post("bypass_processor", "").unwrap();

        let rows = vec![9u8; 8];
        let frame = Frame::new(
            SampleFormat::Undefined,
            0,
            -1,
            -1,
            0,
            &[PlaneInput { width: 8, height: 1, stride: 8, rows: &rows }],
        )
        .unwrap();

        registry.id_send_frame(id, frame).unwrap();
        let out = registry.id_recv_frame(id, Wait::Timeout(Duration::from_secs(2))).unwrap();
        assert_eq!(out.plane_bytes(0).unwrap(), &[9u8; 8]);
    }
}
