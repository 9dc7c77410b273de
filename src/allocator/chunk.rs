//! Slot bookkeeping of a single chunk.
use crate::node::MWNode;

/// Node headers of one chunk with a free-list of reusable slots. A slot is occupied exactly
/// when it holds a header.
#[derive(Debug)]
pub(crate) struct Chunk<const D: usize> {
    nodes: Vec<Option<MWNode<D>>>,
    free: Vec<u32>,
}

impl<const D: usize> Chunk<D> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            nodes: (0..capacity).map(|_| None).collect(),
            // Popped from the back, so low slots are handed out first.
            free: (0..capacity as u32).rev().collect(),
        }
    }

    pub(crate) fn n_occupied(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    pub(crate) fn take_free_slot(&mut self) -> Option<usize> {
        self.free.pop().map(|slot| slot as usize)
    }

    pub(crate) fn occupy(&mut self, slot: usize, node: MWNode<D>) {
        debug_assert!(self.nodes[slot].is_none());
        self.nodes[slot] = Some(node);
    }

    pub(crate) fn release(&mut self, slot: usize) -> Option<MWNode<D>> {
        let node = self.nodes.get_mut(slot)?.take()?;
        self.free.push(slot as u32);
        Some(node)
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&MWNode<D>> {
        self.nodes.get(slot)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut MWNode<D>> {
        self.nodes.get_mut(slot)?.as_mut()
    }

    pub(crate) fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_ref().map(|_| slot))
    }
}
