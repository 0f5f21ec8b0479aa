//! 고정 용량 히스토리 (ring buffer)
//!
//! 용량이 찬 뒤에는 가장 오래된 항목을 덮어쓴다. 읽을 때는 항상 오래된 것부터 순서대로 돌려준다.

#[derive(Debug, Clone)]
pub struct FixedCapacityHistory<T> {
    store: Vec<T>,
    capacity: usize,
    cursor: usize,
}

impl<T: Clone> FixedCapacityHistory<T> {
    /// `capacity`는 0보다 커야 한다. 설정 검증 단계에서 걸러지므로 여기서는 1로 올려 잡는다.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store: Vec::with_capacity(capacity.min(4096)),
            capacity,
            cursor: 0,
        }
    }

    pub fn append(&mut self, item: T) {
        if self.store.len() < self.capacity {
            self.store.push(item);
        } else {
            self.store[self.cursor] = item;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// oldest -> newest
    pub fn snapshot(&self) -> Vec<T> {
        if self.store.len() < self.capacity {
            return self.store.clone();
        }
        let mut ordered = Vec::with_capacity(self.capacity);
        ordered.extend_from_slice(&self.store[self.cursor..]);
        ordered.extend_from_slice(&self.store[..self.cursor]);
        ordered
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.store.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
