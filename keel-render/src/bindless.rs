use std::sync::Mutex;

use keel_graphics as gpu;

/// A texture binding slot entry: an image view paired with its sampler.
pub type Binding = Option<(gpu::TextureView, gpu::Sampler)>;

// The shader-side array is declared with this many descriptors; two blocks
// of 1024 at the top are reserved for the shadow map arrays.
const UPPER_BOUND: u32 = 1_000_000 - 1024 - 1024;
const INITIAL_CAPACITY: u32 = 16;

struct PendingChange {
    index: u32,
    binding: Binding,
}

struct Inner {
    available: Vec<u32>,
    tables: Vec<Vec<Binding>>,
    pending: Vec<Vec<PendingChange>>,
    current_frame: usize,
    capacity: u32,
}

/// Growable table of image+sampler bindings addressed by integer index,
/// replicated once per in-flight frame.
///
/// A binding change lands in the current frame's table immediately and is
/// queued for every other frame copy, applied when that copy next becomes
/// current. A previously submitted frame may still be reading its own
/// copy, so tables are never mutated out of turn.
pub struct BindlessTextureManager {
    inner: Mutex<Inner>,
    frame_count: usize,
}

impl BindlessTextureManager {
    pub fn new(frame_count: usize) -> Self {
        assert!(frame_count >= 1);
        let mut inner = Inner {
            available: Vec::new(),
            tables: vec![Vec::new(); frame_count],
            pending: (0..frame_count).map(|_| Vec::new()).collect(),
            current_frame: 0,
            capacity: 0,
        };
        inner.expand();
        Self {
            inner: Mutex::new(inner),
            frame_count,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Take a free slot index, growing the tables when none is left.
    /// The index stays out of circulation until released.
    pub fn acquire_index(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        if inner.available.is_empty() {
            inner.expand();
        }
        inner.available.pop().unwrap()
    }

    /// Clear the binding, then hand the index back to the free pool. The
    /// caller is responsible for the slot no longer being referenced by
    /// in-flight GPU work.
    pub fn release_index(&self, index: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.set_binding(index, None);
        inner.available.push(index);
    }

    pub fn set_texture(&self, index: u32, view: gpu::TextureView, sampler: gpu::Sampler) {
        let mut inner = self.inner.lock().unwrap();
        inner.set_binding(index, Some((view, sampler)));
    }

    /// The current frame's entry for a slot.
    pub fn binding(&self, index: u32) -> Binding {
        let inner = self.inner.lock().unwrap();
        inner.tables[inner.current_frame][index as usize]
    }

    /// Advance to the next frame copy and apply the binding changes that
    /// were queued while it was potentially still in flight.
    pub fn on_new_frame(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.current_frame = (inner.current_frame + 1) % self.frame_count;
        let frame = inner.current_frame;
        let changes = std::mem::take(&mut inner.pending[frame]);
        for change in changes {
            inner.tables[frame][change.index as usize] = change.binding;
        }
    }
}

impl Inner {
    fn set_binding(&mut self, index: u32, binding: Binding) {
        assert!(index < self.capacity);
        self.tables[self.current_frame][index as usize] = binding;
        for frame in 0..self.tables.len() {
            if frame == self.current_frame {
                continue;
            }
            self.pending[frame].push(PendingChange { index, binding });
        }
    }

    fn expand(&mut self) {
        let old_capacity = self.capacity;
        let new_capacity = if old_capacity == 0 {
            INITIAL_CAPACITY
        } else {
            old_capacity * 2
        };
        assert!(
            new_capacity <= UPPER_BOUND,
            "bindless table exceeded its reservation"
        );
        for table in self.tables.iter_mut() {
            table.resize(new_capacity as usize, None);
        }
        // low indices hand out first
        for index in (old_capacity..new_capacity).rev() {
            self.available.push(index);
        }
        self.capacity = new_capacity;
    }
}
