//! Period/phase counters for periodic transmit messages.
//!
//! Every scheduler tick advances a single global cycle counter. The counter
//! wraps at the least common multiple of all periods (in ticks), so the phase
//! relation between messages repeats exactly once per cycle and the counter
//! never grows without bound.

use crate::error::ConfigError;
use crate::message::TxMessageDescriptor;
use arrayvec::ArrayVec;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Capacity of the transmit message table.
pub const MAX_TX_MESSAGES: usize = 64;

const_assert!(MAX_TX_MESSAGES <= u16::MAX as usize);

/// Table indices of the messages due in one tick, in table order.
pub type DueMessages = ArrayVec<usize, MAX_TX_MESSAGES>;

pub fn greatest_common_divisor(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let remainder = a % b;
        a = b;
        b = remainder;
    }
    a
}

/// Checked least common multiple; `None` on overflow.
pub fn least_common_multiple(a: u32, b: u32) -> Option<u32> {
    if a == 0 || b == 0 {
        return Some(0);
    }
    (a / greatest_common_divisor(a, b)).checked_mul(b)
}

/// Least common multiple of all non-zero values, 1 when there are none.
pub fn least_common_multiple_of(values: &[u32]) -> Option<u32> {
    values
        .iter()
        .filter(|&&value| value > 0)
        .try_fold(1u32, |acc, &value| least_common_multiple(acc, value))
}

/// Ticks since a periodic message last fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCounter {
    pub ticks_since_fire: u32,
    pub fire_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timing {
    /// 0 for on-demand messages
    period_ticks: u32,
    phase_ticks: u32,
}

impl Timing {
    fn is_periodic(self) -> bool {
        self.period_ticks > 0
    }

    /// Position of the global counter inside this message's period, 0 when
    /// the message is due.
    fn offset_at(self, cycle_counter: u32) -> u32 {
        let period = u64::from(self.period_ticks);
        let shifted = u64::from(cycle_counter) + period - u64::from(self.phase_ticks);
        (shifted % period) as u32
    }
}

#[derive(Debug)]
pub struct ScheduleEngine {
    tick_ms: u32,
    timings: Vec<Timing, MAX_TX_MESSAGES>,
    counters: Vec<ScheduleCounter, MAX_TX_MESSAGES>,
    cycle_counter: u32,
    cycle_ticks: u32,
    rollovers: u32,
}

impl ScheduleEngine {
    /// Validates the timing of every descriptor against the tick length and
    /// computes the global cycle length.
    pub fn new<S>(descriptors: &[TxMessageDescriptor<S>], tick_ms: u32) -> Result<Self, ConfigError> {
        if tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if descriptors.len() > MAX_TX_MESSAGES {
            return Err(ConfigError::TooManyMessages {
                count: descriptors.len(),
                capacity: MAX_TX_MESSAGES,
            });
        }

        let mut timings: Vec<Timing, MAX_TX_MESSAGES> = Vec::new();
        let mut cycle_ticks = 1u32;

        for descriptor in descriptors {
            let timing = Self::timing_for(descriptor, tick_ms)?;
            if timing.is_periodic() {
                cycle_ticks = least_common_multiple(cycle_ticks, timing.period_ticks)
                    .ok_or(ConfigError::CycleOverflow)?;
            }
            // Length checked against capacity above
            let _ = timings.push(timing);
        }

        let counters = timings
            .iter()
            .map(|&timing| ScheduleCounter {
                ticks_since_fire: Self::initial_ticks_since_fire(timing),
                fire_count: 0,
            })
            .collect();

        Ok(Self {
            tick_ms,
            timings,
            counters,
            cycle_counter: 0,
            cycle_ticks,
            rollovers: 0,
        })
    }

    fn timing_for<S>(descriptor: &TxMessageDescriptor<S>, tick_ms: u32) -> Result<Timing, ConfigError> {
        let id = descriptor.properties.id;
        let period_ms = descriptor.period_ms;
        let phase_ms = descriptor.phase_ms;

        if period_ms == 0 {
            return Ok(Timing {
                period_ticks: 0,
                phase_ticks: 0,
            });
        }
        if !period_ms.is_multiple_of(tick_ms) {
            return Err(ConfigError::PeriodNotMultipleOfTick {
                id,
                period_ms,
                tick_ms,
            });
        }
        if !phase_ms.is_multiple_of(tick_ms) {
            return Err(ConfigError::PhaseNotMultipleOfTick {
                id,
                phase_ms,
                tick_ms,
            });
        }
        if phase_ms >= period_ms {
            return Err(ConfigError::PhaseNotBelowPeriod {
                id,
                phase_ms,
                period_ms,
            });
        }

        Ok(Timing {
            period_ticks: period_ms / tick_ms,
            phase_ticks: phase_ms / tick_ms,
        })
    }

    fn initial_ticks_since_fire(timing: Timing) -> u32 {
        if timing.is_periodic() {
            timing.offset_at(0)
        } else {
            0
        }
    }

    /// Advances the cycle by one tick and returns the messages due now.
    pub fn tick(&mut self) -> DueMessages {
        let mut due = DueMessages::new();

        critical_section::with(|_| {
            self.cycle_counter += 1;
            let rolled_over = self.cycle_counter >= self.cycle_ticks;
            if rolled_over {
                self.cycle_counter = 0;
                self.rollovers = self.rollovers.wrapping_add(1);
            }

            let cycle_counter = self.cycle_counter;
            for (index, (timing, counter)) in
                self.timings.iter().zip(self.counters.iter_mut()).enumerate()
            {
                if !timing.is_periodic() {
                    continue;
                }

                if timing.offset_at(cycle_counter) == 0 {
                    debug_assert_eq!(
                        counter.ticks_since_fire + 1,
                        timing.period_ticks,
                        "message {index} fired off its period"
                    );
                    counter.ticks_since_fire = 0;
                    counter.fire_count = counter.fire_count.wrapping_add(1);
                    let _ = due.try_push(index);
                } else {
                    counter.ticks_since_fire += 1;
                }
            }

            if rolled_over {
                self.resync_counters();
            }
        });

        due
    }

    /// Puts every per-message counter back on the value its phase implies at
    /// cycle position zero.
    fn resync_counters(&mut self) {
        for (timing, counter) in self.timings.iter().zip(self.counters.iter_mut()) {
            let expected = Self::initial_ticks_since_fire(*timing);
            debug_assert_eq!(counter.ticks_since_fire, expected, "schedule counter drifted");
            counter.ticks_since_fire = expected;
        }
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    /// Current position in the global cycle.
    pub fn cycle_counter(&self) -> u32 {
        self.cycle_counter
    }

    /// Value at which the global counter resets to zero.
    pub fn cycle_ticks(&self) -> u32 {
        self.cycle_ticks
    }

    pub fn cycle_ms(&self) -> u64 {
        u64::from(self.cycle_ticks) * u64::from(self.tick_ms)
    }

    pub fn rollovers(&self) -> u32 {
        self.rollovers
    }

    /// True when no periodic message is configured.
    pub fn is_inert(&self) -> bool {
        !self.timings.iter().any(|timing| timing.is_periodic())
    }

    pub fn counters(&self) -> &[ScheduleCounter] {
        &self.counters
    }

    pub fn period_ticks(&self, index: usize) -> Option<u32> {
        self.timings.get(index).map(|timing| timing.period_ticks)
    }
}
