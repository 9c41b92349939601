//! A [`crate::node::Node`] that is also a [`crate::service::Service`] and a
//! [`crate::channel::Channel`] container — composed via [`DeviceCore`] rather than modeled
//! as an inheritance hierarchy (§9 design notes).

use crate::array::ElementType;
use crate::channel::Channel;
use crate::clock::Clock;
use crate::errors::{DeviceError, ServiceError};
use crate::node::Node;
use crate::service::{Service, ServiceController, ServiceState};
use dashmap::DashMap;
use std::sync::Arc;

/// The `Node` identity, lifecycle controller, and channel/child-device containers a concrete
/// device embeds by value. Channel lookup is local-plus-nested: a bare name resolves against
/// this device's own channels; a `/`-delimited path resolves one segment at a time through
/// `child_devices`, with the final segment looked up in the matched device's channels. This
/// is a deliberate simplification of full node-tree channel addressing (see DESIGN.md):
/// channels themselves are not inserted as `Node` children, only devices are.
pub struct DeviceCore {
    node: Arc<Node>,
    clock: Arc<dyn Clock>,
    controller: ServiceController,
    channels: DashMap<String, Arc<Channel>>,
    child_devices: DashMap<String, Arc<dyn Device>>,
}

impl DeviceCore {
    /// Creates a device core named `name`, timestamping its channels against `clock`.
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            node: Node::new(name),
            clock,
            controller: ServiceController::new(),
            channels: DashMap::new(),
            child_devices: DashMap::new(),
        }
    }

    /// This device's node identity.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// The lifecycle controller driving this device's `Service` transitions.
    pub fn controller(&self) -> &ServiceController {
        &self.controller
    }

    /// The clock new channels and child schedulers are built against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Creates and registers an owned channel named `name`. Fails if the name is already
    /// taken by a channel or a child device.
    pub fn add_channel(
        &self,
        name: impl Into<String>,
        element_type: ElementType,
        size: usize,
    ) -> Result<Arc<Channel>, DeviceError> {
        let name = name.into();
        if self.channels.contains_key(&name) || self.child_devices.contains_key(&name) {
            return Err(DeviceError::ChannelAlreadyExists(name));
        }
        let channel = Arc::new(Channel::new(name.clone(), element_type, size, self.clock.clone()));
        self.channels.insert(name, channel.clone());
        Ok(channel)
    }

    /// Registers `device` as a named child, discoverable by [`DeviceCore::find_channel`]
    /// path lookups and by [`Node::find`] through `self.node`.
    pub fn add_child_device(&self, name: impl Into<String>, device: Arc<dyn Device>) -> Result<(), DeviceError> {
        let name = name.into();
        if self.channels.contains_key(&name) || self.child_devices.contains_key(&name) {
            return Err(DeviceError::ChannelAlreadyExists(name));
        }
        self.node.add_link(&name, device.core().node()).ok();
        self.child_devices.insert(name, device);
        Ok(())
    }

    /// A directly owned channel by its simple name.
    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| entry.value().clone())
    }

    /// Resolves a possibly multi-segment channel path, delegating every segment but the last
    /// to a matching child device.
    pub fn find_channel(&self, path: &str) -> Option<Arc<Channel>> {
        let trimmed = path.trim_start_matches('/');
        let mut segments = trimmed.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return self.channel(first);
        }
        let child = self.child_devices.get(first)?.value().clone();
        child.find_channel(&rest.join("/"))
    }
}

/// The trait every concrete device implements on top of [`Service`]: a device is a `Service`
/// that also exposes a [`DeviceCore`] for channel/node access.
pub trait Device: Service {
    /// The embedded core. Concrete devices forward `Node`/channel-container behaviour to it.
    fn core(&self) -> &DeviceCore;

    /// This device's node identity, shorthand for `self.core().node()`.
    fn node(&self) -> &Arc<Node> {
        self.core().node()
    }

    /// Resolves a channel path, shorthand for `self.core().find_channel(path)`.
    fn find_channel(&self, path: &str) -> Option<Arc<Channel>> {
        self.core().find_channel(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteadyClock;
    use async_trait::async_trait;

    struct LeafDevice {
        core: DeviceCore,
    }

    impl LeafDevice {
        fn new(name: &str, clock: Arc<dyn Clock>) -> Arc<Self> {
            let device = Arc::new(Self { core: DeviceCore::new(name, clock) });
            device.core.add_channel("in", ElementType::I32, 4).unwrap();
            device.core.add_channel("out", ElementType::I32, 4).unwrap();
            device
        }
    }

    #[async_trait]
    impl Service for LeafDevice {
        async fn setup(&self) -> Result<(), ServiceError> {
            self.core.controller().run_setup(async { Ok(()) }).await
        }
        async fn init(&self) -> Result<(), ServiceError> {
            self.core.controller().run_init(async { Ok(()) }).await
        }
        async fn start(&self) -> Result<(), ServiceError> {
            self.core.controller().run_start(async { Ok(()) }).await
        }
        async fn stop(&self) -> Result<(), ServiceError> {
            self.core.controller().run_stop(async { Ok(()) }).await
        }
        async fn reset(&self) -> Result<(), ServiceError> {
            self.core.controller().run_reset(async { Ok(()) }).await
        }
        fn state(&self) -> ServiceState {
            self.core.controller().snapshot()
        }
    }

    impl Device for LeafDevice {
        fn core(&self) -> &DeviceCore {
            &self.core
        }
    }

    #[test]
    fn local_channel_lookup_by_bare_name() {
        let leaf = LeafDevice::new("io", Arc::new(SteadyClock::new()));
        assert!(leaf.find_channel("in").is_some());
        assert!(leaf.find_channel("missing").is_none());
    }

    #[test]
    fn nested_channel_lookup_through_child_device() {
        let clock: Arc<dyn Clock> = Arc::new(SteadyClock::new());
        let root = DeviceCore::new("root", clock.clone());
        let io = LeafDevice::new("io", clock);
        root.add_child_device("io", io).unwrap();

        let found = root.find_channel("/io/in");
        assert!(found.is_some());
        assert_eq!(found.unwrap().name(), "in");
    }
}
