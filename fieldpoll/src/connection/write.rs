use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::connection::{PointWrite, Shared};
use crate::error::{RequestError, WriteError};
use crate::link::{ReadRequest, Request, Response, WriteRequest};
use crate::point::PointSpec;
use crate::types::{AddressRange, DeviceId, PointValue, RegisterClass, RegisterValues, UnitId};

/// Write activity observed by the poll scheduler
#[derive(Default)]
pub(crate) struct WriteTrace {
    pending: AtomicUsize,
    last_write_at: Mutex<Option<Instant>>,
}

impl WriteTrace {
    /// Announce a write, the returned guard ends it
    pub(crate) fn begin(&self) -> WriteGuard<'_> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        WriteGuard { trace: self }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True while a write is pending or the last one ended less than `quiet` ago
    pub(crate) fn should_defer(&self, now: Instant, quiet: Duration) -> bool {
        if self.pending() > 0 {
            return true;
        }
        match *self.last_write_at.lock().unwrap_or_else(|x| x.into_inner()) {
            Some(last) => now < last + quiet,
            None => false,
        }
    }
}

pub(crate) struct WriteGuard<'a> {
    trace: &'a WriteTrace,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        // stamp before the count drops so the scheduler never sees neither
        *self
            .trace
            .last_write_at
            .lock()
            .unwrap_or_else(|x| x.into_inner()) = Some(Instant::now());
        self.trace.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One protocol write, possibly covering several points
#[derive(Debug)]
struct WriteCommand {
    unit: UnitId,
    class: RegisterClass,
    start: u16,
    values: RegisterValues,
    points: Vec<String>,
    /// bit-field points are re-encoded against the current register value
    bit_field: Option<(PointSpec, PointValue)>,
}

impl WriteCommand {
    fn range(&self) -> AddressRange {
        AddressRange {
            start: self.start,
            count: self.values.len() as u16,
        }
    }

    fn end(&self) -> u32 {
        self.start as u32 + self.values.len() as u32
    }

    fn can_merge(&self, next: &WriteCommand, max_span: u16) -> bool {
        match (&self.values, &next.values) {
            (RegisterValues::Words(a), RegisterValues::Words(b)) => {
                self.class == RegisterClass::HoldingRegister
                    && next.class == RegisterClass::HoldingRegister
                    && self.unit == next.unit
                    && self.bit_field.is_none()
                    && next.bit_field.is_none()
                    && self.end() == next.start as u32
                    && a.len() + b.len() <= max_span as usize
            }
            _ => false,
        }
    }

    fn merge(&mut self, next: WriteCommand) {
        if let (RegisterValues::Words(a), RegisterValues::Words(b)) = (&mut self.values, next.values)
        {
            a.extend(b);
        }
        self.points.extend(next.points);
    }
}

pub(crate) async fn write(
    shared: &Shared,
    device: &DeviceId,
    points: Vec<PointWrite>,
) -> Result<(), WriteError> {
    if points.is_empty() {
        return Err(WriteError::Empty);
    }
    if shared.is_closing() {
        return Err(WriteError::Closed);
    }

    let commands = plan(shared, device, points)?;

    let _guard = shared.trace.begin();
    let _section = shared.write_section.lock().await;

    tracing::info!(
        "writing {} command(s) to device {}",
        commands.len(),
        device
    );

    for command in &commands {
        send(shared, command).await?;
    }

    Ok(())
}

/// Resolve, encode, sort and merge the points of one write
fn plan(
    shared: &Shared,
    device: &DeviceId,
    points: Vec<PointWrite>,
) -> Result<Vec<WriteCommand>, WriteError> {
    let mut commands = Vec::with_capacity(points.len());

    for write in points {
        let spec = shared
            .points
            .get(&(device.clone(), write.name.clone()))
            .ok_or_else(|| WriteError::UnknownPoint {
                device: device.to_string(),
                point: write.name.clone(),
            })?;

        if !spec.access.is_writable() {
            return Err(WriteError::NotWritable(spec.name.clone()));
        }
        if !spec.class.is_writable() {
            return Err(WriteError::UnsupportedRegisterClass(spec.class));
        }

        // a bit field is encoded for real once the register has been read
        let current = spec.bits.map(|_| 0);
        let values = shared.codec.encode(spec, &write.value, current)?;

        commands.push(WriteCommand {
            unit: spec.unit,
            class: spec.class,
            start: spec.address,
            values,
            points: vec![spec.name.clone()],
            bit_field: spec.bits.map(|_| (spec.clone(), write.value)),
        });
    }

    commands.sort_by_key(|x| (x.unit, x.class, x.start));

    let mut merged: Vec<WriteCommand> = Vec::with_capacity(commands.len());
    for command in commands {
        match merged.last_mut() {
            Some(last) if last.can_merge(&command, shared.config.max_write_span) => {
                last.merge(command)
            }
            _ => merged.push(command),
        }
    }

    Ok(merged)
}

/// Send one command, retrying transport failures
async fn send(shared: &Shared, command: &WriteCommand) -> Result<(), WriteError> {
    let attempts = 1 + shared.config.retry as usize;
    let mut attempt = 1;
    loop {
        match attempt_once(shared, command).await {
            Ok(()) => return Ok(()),
            Err(Failure::Encoding(err)) => return Err(err.into()),
            Err(Failure::Request(err)) => match err {
                RequestError::Closed | RequestError::Shutdown => return Err(WriteError::Closed),
                err if err.is_transport() && attempt < attempts => {
                    tracing::warn!(
                        "write of {} failed on attempt {} of {}: {}",
                        command.points.join(", "),
                        attempt,
                        attempts,
                        err
                    );
                    attempt += 1;
                }
                err => {
                    return Err(WriteError::Request {
                        range: command.range(),
                        error: err,
                    })
                }
            },
        }
    }
}

enum Failure {
    Request(RequestError),
    Encoding(crate::error::EncodingError),
}

impl From<RequestError> for Failure {
    fn from(err: RequestError) -> Self {
        Failure::Request(err)
    }
}

impl From<crate::error::EncodingError> for Failure {
    fn from(err: crate::error::EncodingError) -> Self {
        Failure::Encoding(err)
    }
}

async fn attempt_once(shared: &Shared, command: &WriteCommand) -> Result<(), Failure> {
    // held across the read and the write of a bit field
    let mut link = shared.lock_link().await?;

    let values = match &command.bit_field {
        None => command.values.clone(),
        Some((point, value)) => {
            let read = Request::Read(ReadRequest::new(
                command.unit,
                RegisterClass::HoldingRegister,
                AddressRange {
                    start: command.start,
                    count: 1,
                },
            ));
            let current = match link.transact(&read).await? {
                Response::Registers(words) => words.first().copied(),
                _ => None,
            };
            let current = current.ok_or(RequestError::BadResponse(
                crate::error::ResponseError::KindMismatch,
            ))?;
            shared.codec.encode(point, value, Some(current))?
        }
    };

    let request = Request::Write(WriteRequest {
        unit: command.unit,
        class: command.class,
        start: command.start,
        values,
    });
    link.transact(&request).await?;
    Ok(())
}
