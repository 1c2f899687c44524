//! Wire shape of the persisted and synced scheduler state.
//!
//! The payload is the only format that leaves the process: it is what the
//! local store writes and what the remote copy holds. Decoding validates
//! tube keys, skip numbers and the position invariant, so a
//! `SchedulerState` built from a payload is always well formed.

use crate::error::PayloadError;
use crate::positions::PositionStore;
use crate::state::{SchedulerState, Tube};
use crate::types::{DistractorLevel, Points, SkipNumber, Stitch, TubeNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full scheduler state as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub user_id: String,
    pub active_tube_number: u8,
    /// Keyed by tube number ("1", "2", "3").
    pub tubes: BTreeMap<String, TubePayload>,
    pub points: Points,
    #[serde(default)]
    pub cycle_count: u64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TubePayload {
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stitch_id: Option<String>,
    /// Keyed by position.
    pub positions: BTreeMap<String, PositionPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPayload {
    pub stitch_id: String,
    pub skip_number: SkipNumber,
    pub distractor_level: DistractorLevel,
    pub perfect_completions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Fallback copy written when remote sync gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    #[serde(flatten)]
    pub payload: StatePayload,
    pub backup_timestamp: DateTime<Utc>,
}

impl From<&SchedulerState> for StatePayload {
    fn from(state: &SchedulerState) -> Self {
        let tubes = state
            .tubes
            .iter()
            .map(|tube| (tube.number.as_u8().to_string(), TubePayload::from(tube)))
            .collect();

        Self {
            user_id: state.user_id.clone(),
            active_tube_number: state.active_tube.as_u8(),
            tubes,
            points: state.points,
            cycle_count: state.cycle_count,
            last_updated: state.last_updated,
        }
    }
}

impl From<&Tube> for TubePayload {
    fn from(tube: &Tube) -> Self {
        let positions = tube
            .positions
            .iter()
            .map(|(position, stitch)| {
                (
                    position.to_string(),
                    PositionPayload {
                        stitch_id: stitch.id.clone(),
                        skip_number: stitch.skip_number,
                        distractor_level: stitch.distractor_level,
                        perfect_completions: stitch.perfect_completions,
                        last_completed_at: stitch.last_completed_at,
                    },
                )
            })
            .collect();

        Self {
            thread_id: tube.thread_id.clone(),
            current_stitch_id: tube.active_stitch_id().map(str::to_string),
            positions,
        }
    }
}

impl TryFrom<StatePayload> for SchedulerState {
    type Error = PayloadError;

    fn try_from(mut payload: StatePayload) -> Result<Self, Self::Error> {
        let active_tube = TubeNumber::from_u8(payload.active_tube_number)
            .ok_or(PayloadError::InvalidActiveTube(payload.active_tube_number))?;

        let mut tubes = Vec::with_capacity(3);
        for number in TubeNumber::ALL {
            let tube_payload = payload
                .tubes
                .remove(&number.as_u8().to_string())
                .ok_or(PayloadError::MissingTube(number.as_u8()))?;
            tubes.push(decode_tube(number, tube_payload)?);
        }
        if let Some(key) = payload.tubes.into_keys().next() {
            return Err(PayloadError::UnknownTube(key));
        }

        let tubes: [Tube; 3] = match tubes.try_into() {
            Ok(tubes) => tubes,
            Err(_) => return Err(PayloadError::MissingTube(3)),
        };

        Ok(Self {
            user_id: payload.user_id,
            active_tube,
            tubes,
            cycle_count: payload.cycle_count,
            points: payload.points,
            last_updated: payload.last_updated,
        })
    }
}

fn decode_tube(number: TubeNumber, payload: TubePayload) -> Result<Tube, PayloadError> {
    let tube_key = number.as_u8();
    let mut entries = Vec::with_capacity(payload.positions.len());
    for (key, entry) in payload.positions {
        let position = key.parse::<u32>().map_err(|_| PayloadError::InvalidPosition {
            tube: tube_key,
            key: key.clone(),
        })?;
        entries.push((
            position,
            Stitch {
                id: entry.stitch_id,
                skip_number: entry.skip_number,
                distractor_level: entry.distractor_level,
                perfect_completions: entry.perfect_completions,
                last_completed_at: entry.last_completed_at,
            },
        ));
    }

    let positions = PositionStore::from_entries(entries)
        .and_then(|store| store.validate().map(|_| store))
        .map_err(|source| PayloadError::Positions { tube: tube_key, source })?;

    Ok(Tube {
        number,
        thread_id: payload.thread_id,
        positions,
    })
}
