//! A fixed-size, runtime-typed buffer with a last-write timestamp and an observer list —
//! the unit of dataflow [`crate::device::Device`]s expose and [`crate::devfilter::DevFilter`]
//! wires together.

use crate::array::{Array, ArrayView, ElementType, Value};
use crate::clock::Clock;
use crate::errors::ChannelError;
use crate::utils::Timestamp;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Receives synchronous notifications when a [`Channel`]'s contents change, or when
/// [`Channel::notify`] is called directly. Invoked on the writer's task while a read view of
/// the channel's array is momentarily held — handlers should be quick; long work belongs on
/// a [`crate::task::Task`] instead.
pub trait ChannelObserver: Send + Sync {
    /// Called once per notification, after the triggering write (if any) has completed.
    fn handle(&self, channel: &Channel);
}

/// Identifies a registered [`ChannelObserver`] for later removal via
/// [`Channel::remove_observer`].
pub type ObserverId = u64;

enum ObserverOp {
    Add(ObserverId, Arc<dyn ChannelObserver>),
    Remove(ObserverId),
}

/// A fixed element-count, fixed-type buffer with a last-write [`Timestamp`] and an observer
/// list. Element count and element type never change after construction (§3 invariants).
pub struct Channel {
    name: String,
    array: RwLock<Array>,
    clock: Arc<dyn Clock>,
    timestamp: AtomicI64,
    write_on_change: bool,
    observers: DashMap<ObserverId, Arc<dyn ChannelObserver>>,
    pending_ops: Mutex<Vec<ObserverOp>>,
    notifying: AtomicBool,
    next_observer_id: AtomicU64,
}

impl Channel {
    /// Creates a channel of `size` zeroed elements of type `element_type`, timestamped
    /// against `clock`.
    pub fn new(name: impl Into<String>, element_type: ElementType, size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            array: RwLock::new(Array::zeroed(element_type, size)),
            clock,
            timestamp: AtomicI64::new(0),
            write_on_change: false,
            observers: DashMap::new(),
            pending_ops: Mutex::new(Vec::new()),
            notifying: AtomicBool::new(false),
            next_observer_id: AtomicU64::new(0),
        }
    }

    /// Builder-style: writes whose bytes exactly match the current contents are dropped (no
    /// timestamp update, no notification).
    pub fn with_write_on_change(mut self, write_on_change: bool) -> Self {
        self.write_on_change = write_on_change;
        self
    }

    /// This channel's name, as registered with its owning [`crate::device::DeviceCore`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The element type fixed at construction.
    pub fn element_type(&self) -> ElementType {
        self.array.read().unwrap().element_type()
    }

    /// The element count fixed at construction.
    pub fn size(&self) -> usize {
        self.array.read().unwrap().len()
    }

    /// The time of the last contents-changing write (or `notify()` call), on the channel's
    /// clock.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp.load(Ordering::Acquire)
    }

    /// Replaces the channel's entire contents with `view`. `view`'s element type and length
    /// must match this channel's.
    pub async fn write(&self, view: ArrayView<'_>) -> Result<(), ChannelError> {
        self.write_bytes(view.buf(), 0).await
    }

    /// Replaces a contiguous byte range starting at `byte_offset`. Updates the timestamp and
    /// notifies observers unless `write_on_change` is set and the bytes are unchanged.
    pub async fn write_bytes(&self, bytes: &[u8], byte_offset: usize) -> Result<(), ChannelError> {
        let now = self.clock.now().await;
        self.write_bytes_at(bytes, byte_offset, now)
    }

    /// As [`Channel::write_bytes`], but with an explicit timestamp rather than consulting
    /// the bound clock. Synchronous, so a [`ChannelObserver::handle`] callback — which runs
    /// on the writer's task and must not block on the async runtime — can write an output
    /// channel directly, stamped with the timestamp of whatever input triggered it.
    pub fn write_bytes_at(&self, bytes: &[u8], byte_offset: usize, timestamp: Timestamp) -> Result<(), ChannelError> {
        let changed = {
            let mut array = self.array.write().unwrap();
            if self.write_on_change && bytes_unchanged(array.buf(), bytes, byte_offset) {
                false
            } else {
                array.copy_from_bytes(bytes, byte_offset)?;
                true
            }
        };
        if changed {
            self.timestamp.store(timestamp, Ordering::Release);
            self.notify();
        }
        Ok(())
    }

    /// Reads the element at `index` as a tagged [`Value`].
    pub fn read(&self, index: usize) -> Result<Value, ChannelError> {
        Ok(self.array.read().unwrap().get(index)?)
    }

    /// Copies this channel's contents into `dest`. Returns `false` without copying if the
    /// element types differ.
    pub fn copy_to(&self, dest: &mut Array) -> bool {
        let array = self.array.read().unwrap();
        if !array.is_same_type(dest) {
            return false;
        }
        let bytes = array.buf().to_vec();
        dest.copy_from_bytes(&bytes, 0).is_ok()
    }

    /// Notifies every registered observer without touching the channel's contents or
    /// timestamp.
    pub fn notify(&self) {
        self.notifying.store(true, Ordering::Release);
        for entry in self.observers.iter() {
            entry.value().handle(self);
        }
        self.notifying.store(false, Ordering::Release);
        self.drain_pending_ops();
    }

    fn drain_pending_ops(&self) {
        let ops = std::mem::take(&mut *self.pending_ops.lock().unwrap());
        for op in ops {
            match op {
                ObserverOp::Add(id, observer) => {
                    self.observers.insert(id, observer);
                }
                ObserverOp::Remove(id) => {
                    self.observers.remove(&id);
                }
            }
        }
    }

    /// Registers an observer, returning an id usable with [`Channel::remove_observer`]. If
    /// called from inside a `handle` callback of an in-progress notification walk, the
    /// addition is deferred until the walk completes (§9 design notes).
    pub fn add_observer(&self, observer: Arc<dyn ChannelObserver>) -> ObserverId {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        if self.notifying.load(Ordering::Acquire) {
            self.pending_ops.lock().unwrap().push(ObserverOp::Add(id, observer));
        } else {
            self.observers.insert(id, observer);
        }
        id
    }

    /// Removes a previously registered observer. Deferred the same way as
    /// [`Channel::add_observer`] when called mid-notification.
    pub fn remove_observer(&self, id: ObserverId) {
        if self.notifying.load(Ordering::Acquire) {
            self.pending_ops.lock().unwrap().push(ObserverOp::Remove(id));
        } else {
            self.observers.remove(&id);
        }
    }
}

fn bytes_unchanged(current: &[u8], incoming: &[u8], byte_offset: usize) -> bool {
    let end = byte_offset + incoming.len();
    current.len() >= end && &current[byte_offset..end] == incoming
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("element_type", &self.element_type())
            .field("size", &self.size())
            .field("timestamp", &self.timestamp())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::sync::atomic::AtomicUsize;

    struct CountingObserver {
        count: Arc<AtomicUsize>,
    }

    impl ChannelObserver for CountingObserver {
        fn handle(&self, _channel: &Channel) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn write_updates_contents_and_notifies() {
        let clock = Arc::new(VirtualClock::from_epoch());
        let channel = Channel::new("in", ElementType::I32, 4, clock);
        let count = Arc::new(AtomicUsize::new(0));
        channel.add_observer(Arc::new(CountingObserver { count: count.clone() }));

        let mut source = Array::zeroed(ElementType::I32, 4);
        source.set(0, Value::I32(42)).unwrap();
        channel.write(source.view()).await.unwrap();

        assert_eq!(channel.read(0).unwrap(), Value::I32(42));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn write_on_change_suppresses_redundant_notification() {
        let clock = Arc::new(VirtualClock::from_epoch());
        let channel = Channel::new("in", ElementType::U8, 2, clock).with_write_on_change(true);
        let count = Arc::new(AtomicUsize::new(0));
        channel.add_observer(Arc::new(CountingObserver { count: count.clone() }));

        channel.write_bytes(&[0, 0], 0).await.unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 0);

        channel.write_bytes(&[1, 0], 0).await.unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn observer_can_remove_itself_mid_notification() {
        struct SelfRemoving {
            id: Mutex<Option<ObserverId>>,
            fired: Arc<AtomicUsize>,
        }
        impl ChannelObserver for SelfRemoving {
            fn handle(&self, channel: &Channel) {
                self.fired.fetch_add(1, Ordering::Relaxed);
                if let Some(id) = self.id.lock().unwrap().take() {
                    channel.remove_observer(id);
                }
            }
        }

        let clock = Arc::new(VirtualClock::from_epoch());
        let channel = Arc::new(Channel::new("in", ElementType::Bool, 1, clock));
        let fired = Arc::new(AtomicUsize::new(0));
        let observer = Arc::new(SelfRemoving { id: Mutex::new(None), fired: fired.clone() });
        let id = channel.add_observer(observer.clone());
        *observer.id.lock().unwrap() = Some(id);

        channel.notify();
        channel.notify();

        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn copy_to_rejects_type_mismatch() {
        let clock = Arc::new(VirtualClock::from_epoch());
        let channel = Channel::new("in", ElementType::I32, 2, clock);
        let mut dest = Array::zeroed(ElementType::F64, 2);
        assert!(!channel.copy_to(&mut dest));
    }
}
