//! Iteration over every entity of a set of archetypes.

use std::iter::FusedIterator;
use std::marker::PhantomData;

use rayon::prelude::*;

use crate::archetype::Archetype;
use crate::chunk::ChunkPtr;
use crate::command_queue::CommandQueue;
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::query::{check_access, Fetch, ReadOnlyFetch};

/// A run of occupied slots `[begin, end)` in one chunk.
#[derive(Clone, Copy)]
struct ChunkSpan<S> {
    chunk: ChunkPtr,
    state: S,
    begin: usize,
    end: usize,
}

impl<S> ChunkSpan<S> {
    fn len(&self) -> usize {
        self.end - self.begin
    }
}

/// A snapshot of the entities in a set of archetypes.
///
/// The iterator borrows the archetypes for `'w`, so no structural change can
/// happen while it is alive. Empty chunks are skipped when it is built.
pub struct EntityIterator<'w, Q: Fetch> {
    spans: Vec<ChunkSpan<Q::State>>,
    archetype_count: usize,
    len: usize,
    _marker: PhantomData<(&'w mut Archetype, fn() -> Q)>,
}

impl<'w, Q: Fetch> EntityIterator<'w, Q> {
    /// Build an iterator over mutably borrowed archetypes.
    ///
    /// # Panics
    /// If an archetype lacks a required slot, or if `Q` borrows a component
    /// mutably more than once.
    pub fn new(archetypes: Vec<&'w mut Archetype>) -> EntityIterator<'w, Q> {
        match EntityIterator::try_new(archetypes) {
            Ok(iter) => iter,
            Err(err) => panic!("cannot iterate: {}", err),
        }
    }

    /// Build an iterator over mutably borrowed archetypes, failing if an
    /// archetype lacks a required slot.
    pub fn try_new(archetypes: Vec<&'w mut Archetype>) -> Result<EntityIterator<'w, Q>> {
        EntityIterator::build(archetypes.iter().map(|a| &**a))
    }

    fn build<'a>(archetypes: impl ExactSizeIterator<Item=&'a Archetype>) -> Result<EntityIterator<'w, Q>> {
        check_access::<Q>();

        let archetype_count = archetypes.len();
        let mut spans = Vec::new();
        let mut len = 0;

        for archetype in archetypes {
            let state = Q::prepare(archetype.layout()).map_err(|ty| EcsError::MissingColumn {
                archetype: archetype.id(),
                component: ty.name(),
            })?;

            for chunk in archetype.occupied_chunks() {
                if chunk.is_empty() {
                    continue;
                }

                spans.push(ChunkSpan {
                    chunk: chunk.as_ptr(),
                    state,
                    begin: 0,
                    end: chunk.len(),
                });
                len += chunk.len();
            }
        }

        Ok(EntityIterator {
            spans,
            archetype_count,
            len,
            _marker: PhantomData,
        })
    }

    /// Return the total number of entities this iterator visits.
    pub fn count(&self) -> usize {
        self.len
    }

    /// Returns true if there is nothing to visit.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the number of archetypes this iterator was built from.
    pub fn archetype_count(&self) -> usize {
        self.archetype_count
    }

    /// Iterate over every entity in archetype then chunk then slot order.
    pub fn iter(&mut self) -> EntityRange<'_, Q> {
        EntityRange::new(self.spans.clone(), self.len)
    }

    /// Fetch the item at a position in iteration order.
    pub fn get(&mut self, index: usize) -> Option<Q::Item<'_>> {
        let mut index = index;

        for span in self.spans.iter() {
            if index < span.len() {
                return Some(unsafe { Q::fetch(span.chunk, &span.state, span.begin + index) });
            }
            index -= span.len();
        }

        None
    }

    /// Split the entities into at most `n` contiguous, disjoint ranges.
    ///
    /// Every range holds `ceil(count / n)` entities except the last one.
    pub fn split(&mut self, n: usize) -> Vec<EntityRange<'_, Q>> {
        let n = n.max(1);
        if self.len == 0 {
            return Vec::new();
        }

        let range_size = (self.len + n - 1) / n;
        let mut ranges = Vec::with_capacity(n);
        let mut current = Vec::new();
        let mut current_len = 0;

        for span in self.spans.iter() {
            let mut begin = span.begin;

            while begin < span.end {
                let take = (span.end - begin).min(range_size - current_len);
                current.push(ChunkSpan {
                    begin,
                    end: begin + take,
                    ..*span
                });
                begin += take;
                current_len += take;

                if current_len == range_size {
                    ranges.push(EntityRange::new(std::mem::take(&mut current), current_len));
                    current_len = 0;
                }
            }
        }

        if current_len > 0 {
            ranges.push(EntityRange::new(current, current_len));
        }

        ranges
    }

    /// Run `f` for every entity, spread over up to `n` parallel ranges.
    ///
    /// Blocks until every range has been processed.
    pub fn process<F>(&mut self, n: usize, f: F)
        where F: for<'a> Fn(Q::Item<'a>) + Send + Sync
    {
        self.split(n)
            .into_par_iter()
            .for_each(|range| range.for_each(&f));
    }

    /// Run `f` for every entity with a private command queue per range.
    ///
    /// `f` receives the index of its range. The queues are returned in range
    /// order and have not been executed.
    pub fn process_deferred<F>(&mut self, n: usize, f: F) -> Vec<CommandQueue>
        where F: for<'a> Fn(usize, &mut CommandQueue, Q::Item<'a>) + Send + Sync
    {
        self.process_deferred_with(n, CommandQueue::new, f)
    }

    /// Like `process_deferred`, taking each range's queue from `make_queue`.
    pub fn process_deferred_with<M, F>(&mut self, n: usize, make_queue: M, f: F) -> Vec<CommandQueue>
        where M: Fn() -> CommandQueue + Send + Sync,
              F: for<'a> Fn(usize, &mut CommandQueue, Q::Item<'a>) + Send + Sync
    {
        self.split(n)
            .into_par_iter()
            .enumerate()
            .map(|(index, range)| {
                let mut queue = make_queue();
                for item in range {
                    f(index, &mut queue, item);
                }
                queue
            })
            .collect()
    }
}

impl<'w, Q: ReadOnlyFetch> EntityIterator<'w, Q> {
    /// Build an iterator over shared archetypes for a fetch which never writes.
    ///
    /// # Panics
    /// If an archetype lacks a required slot.
    pub fn new_read_only(archetypes: Vec<&'w Archetype>) -> EntityIterator<'w, Q> {
        match EntityIterator::build(archetypes.into_iter()) {
            Ok(iter) => iter,
            Err(err) => panic!("cannot iterate: {}", err),
        }
    }

    /// Build a read-only iterator, failing if an archetype lacks a required slot.
    pub fn try_new_read_only(archetypes: Vec<&'w Archetype>) -> Result<EntityIterator<'w, Q>> {
        EntityIterator::build(archetypes.into_iter())
    }
}

impl<'a, 'w, Q: Fetch> IntoIterator for &'a mut EntityIterator<'w, Q> {
    type Item = Q::Item<'a>;
    type IntoIter = EntityRange<'a, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A contiguous range of entities from an `EntityIterator`.
///
/// Ranges from one `split` never overlap, so they may be processed on
/// different threads.
pub struct EntityRange<'r, Q: Fetch> {
    spans: Vec<ChunkSpan<Q::State>>,
    head: usize,
    tail: usize,
    remaining: usize,
    _marker: PhantomData<(&'r mut Entity, fn() -> Q)>,
}

unsafe impl<'r, Q: Fetch> Send for EntityRange<'r, Q> {}

impl<'r, Q: Fetch> EntityRange<'r, Q> {
    fn new(spans: Vec<ChunkSpan<Q::State>>, len: usize) -> EntityRange<'r, Q> {
        let tail = spans.len();

        EntityRange {
            spans,
            head: 0,
            tail,
            remaining: len,
            _marker: PhantomData,
        }
    }
}

impl<'r, Q: Fetch> Iterator for EntityRange<'r, Q> {
    type Item = Q::Item<'r>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.head < self.tail {
            let span = &mut self.spans[self.head];

            if span.begin < span.end {
                let slot = span.begin;
                span.begin += 1;
                self.remaining -= 1;
                return Some(unsafe { Q::fetch(span.chunk, &span.state, slot) });
            }

            self.head += 1;
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'r, Q: Fetch> DoubleEndedIterator for EntityRange<'r, Q> {
    fn next_back(&mut self) -> Option<Self::Item> {
        while self.head < self.tail {
            let span = &mut self.spans[self.tail - 1];

            if span.begin < span.end {
                span.end -= 1;
                self.remaining -= 1;
                return Some(unsafe { Q::fetch(span.chunk, &span.state, span.end) });
            }

            self.tail -= 1;
        }

        None
    }
}

impl<'r, Q: Fetch> ExactSizeIterator for EntityRange<'r, Q> {}

impl<'r, Q: Fetch> FusedIterator for EntityRange<'r, Q> {}
