//! Network time client
//!
//! A non-blocking SNTP state machine advanced by the host loop. Exactly one of
//! two timers is armed once started: the send timer while waiting for the
//! next scheduled request, or the poll timer while a request is outstanding.
//!
//! ```text
//!            next_send fires: send request
//! ScheduledWait ---------------------------> AwaitingResponse
//!      ^                                           |
//!      |  valid response: set clock, reschedule    |
//!      |  attempts exhausted: schedule retry       |
//!      +-------------------------------------------+
//! ```
//!
//! After the first accepted response requests repeat at the fast interval;
//! after the second they settle to the steady interval. A separate watchdog
//! marks the clock stale when no response has been accepted for longer than
//! the steady interval plus a grace period.

use hal_abstractions::network::DatagramTransport;
use hal_abstractions::rtc::SystemClock;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::timer::ElapsedTimer;

/// SNTP packet length
pub const NTP_PACKET_SIZE: usize = 48;

/// Seconds from 1900-01-01 (NTP era 0) to 1970-01-01
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Byte offset of the transmit timestamp seconds
const TRANSMIT_TIMESTAMP_OFFSET: usize = 40;

/// Packets drained per poll before giving up for this tick
const MAX_PACKETS_PER_POLL: usize = 4;

/// Build an SNTP client request: version 4, client mode, unsynchronized.
pub fn build_request() -> [u8; NTP_PACKET_SIZE] {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    packet[0] = 0b1110_0011; // LI = 3 (unsynchronized), VN = 4, Mode = 3 (client)
    packet[1] = 0; // Stratum
    packet[2] = 6; // Poll interval
    packet[3] = 0xEC; // Precision
    packet[12..16].copy_from_slice(b"1N14"); // Reference identifier
    packet
}

/// Extract the transmit timestamp seconds as Unix time.
pub fn decode_transmit_epoch(packet: &[u8]) -> Result<i64, SyncError> {
    if packet.len() < NTP_PACKET_SIZE {
        return Err(SyncError::ShortPacket);
    }
    let mut seconds = [0u8; 4];
    seconds.copy_from_slice(
        &packet[TRANSMIT_TIMESTAMP_OFFSET..TRANSMIT_TIMESTAMP_OFFSET + 4],
    );
    Ok(i64::from(u32::from_be_bytes(seconds)) - NTP_UNIX_OFFSET)
}

/// Where the client is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncPhase {
    /// Waiting for the next scheduled request
    ScheduledWait,
    /// Request sent, polling for the response
    AwaitingResponse,
}

/// Observable result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncEvent {
    /// A request was issued
    RequestSent,
    /// A response was accepted and the clock set
    Synced { epoch: i64 },
    /// Polled without a response; more attempts remain
    Waiting { attempts_remaining: u16 },
    /// Request abandoned; a retry is scheduled
    TimedOut,
}

/// Snapshot of the client for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub transport_started: bool,
    pub have_first_response: bool,
    pub have_second_response: bool,
    pub stale: bool,
    /// Requests abandoned without a response
    pub missed_updates: u32,
    pub last_synced_epoch: Option<i64>,
    /// Time until the next request, while one is scheduled
    pub next_request_in_ms: Option<u64>,
}

/// SNTP client state machine
#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    transport_started: bool,
    phase: SyncPhase,
    next_send: ElapsedTimer,
    poll: ElapsedTimer,
    attempts_remaining: u16,
    staleness: ElapsedTimer,
    have_first_response: bool,
    have_second_response: bool,
    missed_updates: u32,
    last_synced_epoch: Option<i64>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            transport_started: false,
            phase: SyncPhase::ScheduledWait,
            next_send: ElapsedTimer::new(),
            poll: ElapsedTimer::new(),
            attempts_remaining: 0,
            staleness: ElapsedTimer::new(),
            have_first_response: false,
            have_second_response: false,
            missed_updates: 0,
            last_synced_epoch: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bind the transport and schedule an immediate first request.
    ///
    /// On failure the engine stays inert: `tick` does nothing and the clock
    /// reports stale. Calling again after success is a no-op.
    pub fn start<T: DatagramTransport>(
        &mut self,
        transport: &mut T,
        now_ms: u64,
    ) -> Result<(), SyncError> {
        if self.transport_started {
            return Ok(());
        }
        transport
            .begin(self.config.local_port)
            .map_err(|_| SyncError::TransportUnavailable)?;
        self.transport_started = true;
        self.phase = SyncPhase::ScheduledWait;
        self.next_send.start(now_ms, 0);
        self.staleness
            .start(now_ms, self.config.staleness_threshold_ms());
        info!("Time client listening on port {}", self.config.local_port);
        Ok(())
    }

    /// Advance the state machine. Never blocks.
    pub fn tick<T: DatagramTransport, C: SystemClock>(
        &mut self,
        transport: &mut T,
        clock: &mut C,
        now_ms: u64,
    ) -> Option<SyncEvent> {
        if !self.transport_started {
            return None;
        }

        if self.staleness.just_finished(now_ms) {
            warn!(
                "No time update for {} min, clock is stale",
                self.config.staleness_threshold_ms() / 60_000
            );
        }

        match self.phase {
            SyncPhase::ScheduledWait => {
                if !self.next_send.just_finished(now_ms) {
                    return None;
                }
                self.send_request(transport);
                self.attempts_remaining = self.config.max_poll_attempts;
                self.poll.start(now_ms, self.config.poll_interval_ms);
                self.phase = SyncPhase::AwaitingResponse;
                Some(SyncEvent::RequestSent)
            }
            SyncPhase::AwaitingResponse => {
                if !self.poll.just_finished(now_ms) {
                    return None;
                }
                if let Some(epoch) = receive_epoch(transport) {
                    self.accept(epoch, clock, now_ms);
                    return Some(SyncEvent::Synced { epoch });
                }

                self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
                if self.attempts_remaining > 0 {
                    self.poll.start(now_ms, self.config.poll_interval_ms);
                    return Some(SyncEvent::Waiting {
                        attempts_remaining: self.attempts_remaining,
                    });
                }

                self.missed_updates = self.missed_updates.saturating_add(1);
                warn!(
                    "No time response from {}, retrying in {} s ({} missed)",
                    self.config.server,
                    self.config.retry_interval_ms / 1000,
                    self.missed_updates
                );
                self.schedule(now_ms, self.config.retry_interval_ms);
                Some(SyncEvent::TimedOut)
            }
        }
    }

    /// Move the next request to now.
    ///
    /// Ignored while a request is outstanding or before the transport started.
    /// Returns `true` if the request was rescheduled.
    pub fn force_update(&mut self, now_ms: u64) -> bool {
        if !self.transport_started || self.phase == SyncPhase::AwaitingResponse {
            return false;
        }
        debug!("Forced time update");
        self.next_send.start(now_ms, 0);
        true
    }

    /// True if no response has been accepted within the staleness threshold,
    /// or the transport never started.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        !self.transport_started || self.staleness.has_expired(now_ms)
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn status(&self, now_ms: u64) -> SyncStatus {
        SyncStatus {
            phase: self.phase,
            transport_started: self.transport_started,
            have_first_response: self.have_first_response,
            have_second_response: self.have_second_response,
            stale: self.is_stale(now_ms),
            missed_updates: self.missed_updates,
            last_synced_epoch: self.last_synced_epoch,
            next_request_in_ms: self.next_send.remaining_ms(now_ms),
        }
    }

    /// Whether the send and poll timers are armed, in that order
    pub fn armed_timers(&self) -> (bool, bool) {
        (self.next_send.is_running(), self.poll.is_running())
    }

    fn send_request<T: DatagramTransport>(&mut self, transport: &mut T) {
        let request = build_request();
        match transport.send_datagram(self.config.server, self.config.server_port, &request) {
            Ok(()) => debug!("Time request sent to {}", self.config.server),
            // Still poll: running out of attempts turns this into a retry
            Err(_) => warn!("Time request to {} not sent", self.config.server),
        }
    }

    fn accept<C: SystemClock>(&mut self, epoch: i64, clock: &mut C, now_ms: u64) {
        clock.set_clock(epoch, 0);
        self.staleness
            .start(now_ms, self.config.staleness_threshold_ms());
        if self.have_first_response {
            self.have_second_response = true;
        }
        self.have_first_response = true;
        self.last_synced_epoch = Some(epoch);

        let interval_ms = if self.have_second_response {
            self.config.steady_interval_ms
        } else {
            self.config.fast_interval_ms
        };
        info!(
            "Clock set to {} from {}, next update in {} s",
            epoch,
            self.config.server,
            interval_ms / 1000
        );
        self.schedule(now_ms, interval_ms);
    }

    fn schedule(&mut self, now_ms: u64, interval_ms: u64) {
        self.poll.stop();
        self.next_send.start(now_ms, interval_ms);
        self.phase = SyncPhase::ScheduledWait;
    }
}

/// Drain queued datagrams until one carries a usable timestamp.
fn receive_epoch<T: DatagramTransport>(transport: &mut T) -> Option<i64> {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    for _ in 0..MAX_PACKETS_PER_POLL {
        let len = transport.poll_incoming(&mut packet)?;
        match decode_transmit_epoch(&packet[..len.min(NTP_PACKET_SIZE)]) {
            Ok(epoch) => return Some(epoch),
            Err(e) => debug!("Ignoring time packet: {}", e),
        }
    }
    None
}
