//! Track renumbering shared by every structural track edit.
//!
//! The caller hands over the new track ordering, each slot remembering the
//! id it had before the edit. Ids are reassigned 1..N in slot order and the
//! resulting old->new map is applied to the mixer and the plugin nodes.

use std::collections::BTreeMap;

use crate::model::{MixerEntry, Project, Track, TrackId};

#[derive(Debug, Clone)]
pub(crate) struct TrackSlot {
    pub track: Track,
    /// Id before the edit; `None` for a freshly created track.
    pub origin: Option<TrackId>,
}

impl TrackSlot {
    pub fn existing(track: Track) -> Self {
        let origin = Some(track.track_id);
        Self { track, origin }
    }

    pub fn fresh(track: Track) -> Self {
        Self {
            track,
            origin: None,
        }
    }
}

/// Current ordering of the project as slots.
pub(crate) fn current_slots(project: &Project) -> Vec<TrackSlot> {
    project
        .tracks
        .iter()
        .cloned()
        .map(TrackSlot::existing)
        .collect()
}

/// Applies a new ordering and returns the old->new id map.
pub(crate) fn apply_order(
    project: &mut Project,
    slots: Vec<TrackSlot>,
) -> BTreeMap<TrackId, TrackId> {
    let mut id_map = BTreeMap::new();
    let mut tracks = Vec::with_capacity(slots.len());
    for (position, slot) in slots.into_iter().enumerate() {
        let new_id = position_to_id(position);
        if let Some(origin) = slot.origin {
            id_map.insert(origin, new_id);
        }
        let mut track = slot.track;
        track.track_id = new_id;
        tracks.push(track);
    }
    project.tracks = tracks;

    remap_mixer(project, &id_map);
    remap_plugin_nodes(project, &id_map);
    normalize_plugin_indices(project);
    id_map
}

fn remap_mixer(project: &mut Project, id_map: &BTreeMap<TrackId, TrackId>) {
    let mut previous: BTreeMap<TrackId, MixerEntry> = BTreeMap::new();
    for entry in project.mixer.drain(..) {
        if let Some(&new_id) = id_map.get(&entry.track_id) {
            previous.entry(new_id).or_insert(MixerEntry {
                track_id: new_id,
                ..entry
            });
        }
    }

    project.mixer = project
        .tracks
        .iter()
        .map(|track| {
            previous
                .remove(&track.track_id)
                .unwrap_or_else(|| MixerEntry::new(track.track_id))
        })
        .collect();
}

fn remap_plugin_nodes(project: &mut Project, id_map: &BTreeMap<TrackId, TrackId>) {
    project.plugin_nodes.retain_mut(|node| match id_map.get(&node.track_id) {
        Some(&new_id) => {
            node.track_id = new_id;
            true
        }
        None => false,
    });
}

/// Rewrites each track's `plugin_index` to 0..k-1.
///
/// Ordering is by the current index, ties broken by position in the node list.
/// The node list itself ends up sorted by (track, index).
pub(crate) fn normalize_plugin_indices(project: &mut Project) {
    let mut keyed: Vec<_> = project
        .plugin_nodes
        .drain(..)
        .enumerate()
        .map(|(insertion, node)| ((node.track_id, node.plugin_index, insertion), node))
        .collect();
    keyed.sort_by_key(|(key, _)| *key);

    let mut next_index: BTreeMap<TrackId, u32> = BTreeMap::new();
    project.plugin_nodes = keyed
        .into_iter()
        .map(|(_, mut node)| {
            let slot = next_index.entry(node.track_id).or_insert(0);
            node.plugin_index = *slot;
            *slot += 1;
            node
        })
        .collect();
}

/// Makes sure every track has exactly one mixer entry, in track order.
pub(crate) fn ensure_mixer_coverage(project: &mut Project) {
    let identity: BTreeMap<TrackId, TrackId> = project
        .tracks
        .iter()
        .map(|track| (track.track_id, track.track_id))
        .collect();
    remap_mixer(project, &identity);
}

fn position_to_id(position: usize) -> TrackId {
    TrackId::try_from(position + 1).unwrap_or(TrackId::MAX)
}
