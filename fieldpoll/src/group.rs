use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::{poll_backoff, Backoff};
use crate::link::ReadRequest;
use crate::point::{find_overlaps, PointSpec};
use crate::types::{AddressRange, DeviceId, RegisterClass, UnitId};

/// Stable token identifying a [`TaskGroup`] within its connection
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

impl GroupId {
    /// Index of the group in build order
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group {}", self.0)
    }
}

/// A batched read of a contiguous register range on one unit
///
/// The range and the member points never change after the build. Only the poll
/// bookkeeping mutates.
#[derive(Clone, Debug)]
pub struct TaskGroup {
    id: GroupId,
    unit: UnitId,
    class: RegisterClass,
    range: AddressRange,
    points: Vec<PointSpec>,
    period: Duration,
    last_poll_at: Option<Instant>,
    consecutive_timeouts: u32,
}

impl PartialEq for TaskGroup {
    /// groups are equal if they have the same boundaries and membership
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.unit == other.unit
            && self.class == other.class
            && self.range == other.range
            && self.points == other.points
            && self.period == other.period
    }
}

impl TaskGroup {
    fn new(id: GroupId, point: PointSpec, range: AddressRange) -> Self {
        Self {
            id,
            unit: point.unit,
            class: point.class,
            range,
            period: point.period,
            points: vec![point],
            last_poll_at: None,
            consecutive_timeouts: 0,
        }
    }

    /// stable id of the group
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// unit polled by the group
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// register class polled by the group
    pub fn class(&self) -> RegisterClass {
        self.class
    }

    /// addresses read by the group
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// member points in insertion order
    pub fn points(&self) -> &[PointSpec] {
        &self.points
    }

    /// base polling period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// time of the last completed poll, successful or not
    pub fn last_poll_at(&self) -> Option<Instant> {
        self.last_poll_at
    }

    /// number of failed polls since the last success
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Distinct devices of the member points, in first-seen order
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = Vec::new();
        for point in &self.points {
            if !devices.contains(&point.device) {
                devices.push(point.device.clone());
            }
        }
        devices
    }

    pub(crate) fn read_request(&self) -> ReadRequest {
        ReadRequest::new(self.unit, self.class, self.range)
    }

    /// Polling period after backoff
    ///
    /// An overflowing backoff resets the failure count and yields the base period.
    pub fn effective_period(&mut self, max_backoff: Duration) -> Duration {
        match poll_backoff(self.period, self.consecutive_timeouts, max_backoff) {
            Backoff::Delay(x) => x,
            Backoff::Overflow => {
                tracing::warn!(
                    "{} backoff overflow after {} failures, resetting",
                    self.id,
                    self.consecutive_timeouts
                );
                self.consecutive_timeouts = 0;
                self.period
            }
        }
    }

    /// True if the group has never been polled or its effective period has elapsed
    pub fn is_due(&mut self, now: Instant, max_backoff: Duration) -> bool {
        match self.last_poll_at {
            None => true,
            Some(last) => now >= last + self.effective_period(max_backoff),
        }
    }

    pub(crate) fn record_success(&mut self, now: Instant) {
        self.consecutive_timeouts = 0;
        self.last_poll_at = Some(now);
    }

    pub(crate) fn record_failure(&mut self, now: Instant) {
        self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
        self.last_poll_at = Some(now);
    }
}

/// Batch the readable points into the fewest contiguous read groups
///
/// Points are sorted by period and then by address. Each point joins the first group
/// with the same period, unit and register class whose span, extended by the point,
/// stays within `max_batch_span`. Otherwise it opens a new group. A point wider than
/// `max_batch_span` gets a group of its own.
///
/// Invalid points are dropped with a warning and write-only points are skipped. The
/// result only depends on the order and content of `points`.
pub fn build_groups(points: &[PointSpec], max_batch_span: u16) -> Vec<TaskGroup> {
    let mut readable: Vec<(&PointSpec, AddressRange)> = Vec::with_capacity(points.len());
    for point in points {
        if let Err(err) = point.validate() {
            tracing::warn!(
                "dropping point {} of device {}: {}",
                point.name,
                point.device,
                err
            );
            continue;
        }
        if !point.access.is_readable() {
            continue;
        }
        match point.range() {
            Ok(range) => readable.push((point, range)),
            Err(err) => tracing::warn!("dropping point {}: {}", point.name, err),
        }
    }

    // stable, so equal keys keep their configured order
    readable.sort_by_key(|(point, range)| (point.period, range.start));

    let specs: Vec<PointSpec> = readable.iter().map(|(x, _)| (*x).clone()).collect();
    for overlap in find_overlaps(&specs) {
        let (a, b) = (&specs[overlap.first], &specs[overlap.second]);
        tracing::warn!(
            "points {}/{} and {}/{} decode overlapping registers on unit {}",
            a.device,
            a.name,
            b.device,
            b.name,
            a.unit
        );
    }

    let mut groups: Vec<TaskGroup> = Vec::new();
    for (point, range) in readable {
        let existing = groups.iter_mut().find(|group| {
            group.period == point.period
                && group.unit == point.unit
                && group.class == point.class
                && group.range.union_span(range) <= max_batch_span as u32
        });

        match existing {
            Some(group) => {
                group.range = group.range.union(range);
                group.points.push(point.clone());
            }
            None => {
                let id = GroupId(groups.len());
                groups.push(TaskGroup::new(id, point.clone(), range));
            }
        }
    }

    groups
}
