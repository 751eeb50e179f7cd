/*!
MC146818-style real-time clock and CMOS RAM (spec §4.4).

The update cycle splits one second into three phases at `ClockFreq`
granularity (`set-UIP`, `start-update`, `finish-update`); on `finish-update`
the calendar advances one second, handling BCD/binary representation,
12/24-hour mode and DST spring-forward/fall-back, and the result drives
UF/AF/PF into IRQF -> IRQ8. A separate Bresenham-accumulated periodic
interrupt (rate 1-15, §4.4) raises PF independently of the update cycle.

No teacher or pack file models an MC146818 directly; the calendar and
update-cycle arithmetic here is written fresh from spec §4.4 and
`original_source/src/rtc.c`'s phase offsets and DST rule, following the
surrounding modules' `Default + new + reset` construction convention and
the 3-class `PcError`/`RecoverableKind` error split for out-of-range CMOS
reads.
*/

use crate::config::BootTime;
use crate::scheduler::{Clock, Device, RateConverter};

const RAM_SIZE: usize = 128;

const REG_SECONDS: u8 = 0x00;
const REG_SECONDS_ALARM: u8 = 0x01;
const REG_MINUTES: u8 = 0x02;
const REG_MINUTES_ALARM: u8 = 0x03;
const REG_HOURS: u8 = 0x04;
const REG_HOURS_ALARM: u8 = 0x05;
const REG_DAY_OF_WEEK: u8 = 0x06;
const REG_DAY_OF_MONTH: u8 = 0x07;
const REG_MONTH: u8 = 0x08;
const REG_YEAR: u8 = 0x09;
const REG_A: u8 = 0x0A;
const REG_B: u8 = 0x0B;
const REG_C: u8 = 0x0C;
const REG_D: u8 = 0x0D;
const REG_CENTURY: u8 = 0x32;
const REG_CHECKSUM_LO: u8 = 0x2E;
const REG_CHECKSUM_HI: u8 = 0x2F;

/// Phase offsets within the one-second update cycle, in microseconds from
/// the start of the second (spec §4.4).
const SET_UIP_US: u64 = 1_000_000 - 2228;
const START_UPDATE_US: u64 = 1_000_000 - 1984;
const FINISH_UPDATE_US: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdatePhase {
    Idle,
    Uip,
    Updating,
}

pub struct Rtc {
    ram: [u8; RAM_SIZE],
    index: u8,
    phase: UpdatePhase,
    /// Cycles elapsed within the current one-second window.
    elapsed_cc: u64,
    cc_per_second: u64,
    pie: RateConverter,
    cc_per_us: u64,
}

impl Rtc {
    pub fn new(cpu_clock_hz: u64) -> Self {
        let mut rtc = Self {
            ram: [0; RAM_SIZE],
            index: 0,
            phase: UpdatePhase::Idle,
            elapsed_cc: 0,
            cc_per_second: cpu_clock_hz.max(1),
            pie: RateConverter::new(0, 1),
            cc_per_us: cpu_clock_hz.max(1) / 1_000_000,
        };
        rtc.ram[REG_A as usize] = 0x26; // DV=010 (32.768 kHz), RS=0110 (1024 Hz)
        rtc.ram[REG_B as usize] = 0x02; // 24-hour mode, BCD, not SET
        rtc.update_pie_rate();
        rtc
    }

    pub fn set_cpu_clock_hz(&mut self, cpu_clock_hz: u64) {
        self.cc_per_second = cpu_clock_hz.max(1);
        self.cc_per_us = cpu_clock_hz.max(1) / 1_000_000;
        self.update_pie_rate();
    }

    /// Seed the calendar registers from a host-provided wall-clock sample.
    /// Called once at boot from [`crate::machine::HostContext::get_current_time`].
    pub fn seed_time(&mut self, time: BootTime) {
        let binary = self.binary_mode();
        self.ram[REG_SECONDS as usize] = self.encode(time.second, binary);
        self.ram[REG_MINUTES as usize] = self.encode(time.minute, binary);
        self.ram[REG_HOURS as usize] = self.encode_hour(time.hour, binary);
        self.ram[REG_DAY_OF_WEEK as usize] = self.encode(time.day_of_week, binary);
        self.ram[REG_DAY_OF_MONTH as usize] = self.encode(time.day_of_month, binary);
        self.ram[REG_MONTH as usize] = self.encode(time.month, binary);
        self.ram[REG_YEAR as usize] = self.encode((time.year % 100) as u8, binary);
        self.ram[REG_CENTURY as usize] = self.encode((time.year / 100) as u8, binary);
    }

    fn binary_mode(&self) -> bool {
        self.ram[REG_B as usize] & 0x04 != 0
    }

    fn hour_24(&self) -> bool {
        self.ram[REG_B as usize] & 0x02 != 0
    }

    fn dst_enabled(&self) -> bool {
        self.ram[REG_B as usize] & 0x01 != 0
    }

    fn encode(&self, value: u8, binary: bool) -> u8 {
        if binary {
            value
        } else {
            bin_to_bcd(value)
        }
    }

    fn decode(&self, value: u8, binary: bool) -> u8 {
        if binary {
            value
        } else {
            bcd_to_bin(value)
        }
    }

    fn encode_hour(&self, hour24: u8, binary: bool) -> u8 {
        if self.hour_24() {
            self.encode(hour24, binary)
        } else {
            let (h12, pm) = to_12_hour(hour24);
            let encoded = self.encode(h12, binary);
            if pm {
                encoded | 0x80
            } else {
                encoded
            }
        }
    }

    fn decode_hour(&self, raw: u8, binary: bool) -> u8 {
        if self.hour_24() {
            self.decode(raw, binary)
        } else {
            let pm = raw & 0x80 != 0;
            let h12 = self.decode(raw & 0x7F, binary);
            from_12_hour(h12, pm)
        }
    }

    fn rate_select(&self) -> u8 {
        self.ram[REG_A as usize] & 0x0F
    }

    fn update_pie_rate(&mut self) {
        let rate = self.rate_select();
        if rate == 0 {
            self.pie = RateConverter::new(0, 1);
            return;
        }
        let freq_hz = 32_768u64 >> (rate - 1).min(15);
        self.pie = RateConverter::new(freq_hz, self.cc_per_second);
    }

    fn pie_enabled(&self) -> bool {
        self.ram[REG_B as usize] & 0x40 != 0
    }

    fn aie_enabled(&self) -> bool {
        self.ram[REG_B as usize] & 0x20 != 0
    }

    fn uie_enabled(&self) -> bool {
        self.ram[REG_B as usize] & 0x10 != 0
    }

    fn update_enabled(&self) -> bool {
        self.ram[REG_B as usize] & 0x80 == 0
    }

    fn raise_flag(&mut self, mask: u8) {
        self.ram[REG_C as usize] |= mask;
        self.recompute_irqf();
    }

    fn recompute_irqf(&mut self) {
        let c = self.ram[REG_C as usize];
        let pf = c & 0x40 != 0 && self.pie_enabled();
        let af = c & 0x20 != 0 && self.aie_enabled();
        let uf = c & 0x10 != 0 && self.uie_enabled();
        if pf || af || uf {
            self.ram[REG_C as usize] |= 0x80;
        } else {
            self.ram[REG_C as usize] &= !0x80;
        }
    }

    /// Current level of the line driving IRQ8; the owning `Machine` reads
    /// this once per sweep and forwards it into the interrupt controller.
    pub fn irq_level(&self) -> bool {
        self.ram[REG_C as usize] & 0x80 != 0
    }

    fn alarm_matches(&self) -> bool {
        let matches = |reg: u8, alarm: u8| {
            let a = self.ram[alarm as usize];
            a & 0xC0 == 0xC0 || self.ram[reg as usize] == a
        };
        matches(REG_SECONDS, REG_SECONDS_ALARM)
            && matches(REG_MINUTES, REG_MINUTES_ALARM)
            && matches(REG_HOURS, REG_HOURS_ALARM)
    }

    fn finish_update(&mut self) {
        let binary = self.binary_mode();
        if self.update_enabled() {
            self.advance_calendar(binary);
        }
        self.raise_flag(0x10); // UF
        if self.alarm_matches() {
            self.raise_flag(0x20); // AF
        }
    }

    fn advance_calendar(&mut self, binary: bool) {
        let mut hour24 = self.decode_hour(self.ram[REG_HOURS as usize], binary);
        let mut minute = self.decode(self.ram[REG_MINUTES as usize], binary);
        let mut second = self.decode(self.ram[REG_SECONDS as usize], binary);
        let mut dow = self.decode(self.ram[REG_DAY_OF_WEEK as usize], binary);
        let mut dom = self.decode(self.ram[REG_DAY_OF_MONTH as usize], binary);
        let mut month = self.decode(self.ram[REG_MONTH as usize], binary);
        let mut year = self.decode(self.ram[REG_YEAR as usize], binary) as u16;
        let mut century = self.decode(self.ram[REG_CENTURY as usize], binary) as u16;

        second += 1;
        if second >= 60 {
            second = 0;
            minute += 1;
            if minute >= 60 {
                minute = 0;
                hour24 += 1;
                if hour24 >= 24 {
                    hour24 = 0;
                    dow = dow % 7 + 1;
                    dom += 1;
                    let full_year = century * 100 + year;
                    if dom > days_in_month(month, full_year) {
                        dom = 1;
                        month += 1;
                        if month > 12 {
                            month = 1;
                            year += 1;
                            if year > 99 {
                                year = 0;
                                century += 1;
                            }
                        }
                    }
                }
            }
        }
        // Check against the post-carry clock: the transition fires the
        // instant the wall clock reaches 02:00:00, which only exists after
        // the cascade above has actually rolled the hour over to 2.
        if self.dst_enabled() {
            apply_dst(&mut hour24, &mut minute, &mut second, dow, dom, month);
        }

        self.ram[REG_SECONDS as usize] = self.encode(second, binary);
        self.ram[REG_MINUTES as usize] = self.encode(minute, binary);
        self.ram[REG_HOURS as usize] = self.encode_hour(hour24, binary);
        self.ram[REG_DAY_OF_WEEK as usize] = self.encode(dow, binary);
        self.ram[REG_DAY_OF_MONTH as usize] = self.encode(dom, binary);
        self.ram[REG_MONTH as usize] = self.encode(month, binary);
        self.ram[REG_YEAR as usize] = self.encode(year as u8, binary);
        self.ram[REG_CENTURY as usize] = self.encode(century as u8, binary);
    }

    fn equipment_checksum(&self) -> u16 {
        // Standard CMOS checksum range: bytes 0x10-0x2D.
        self.ram[0x10..=0x2D].iter().map(|&b| b as u16).sum()
    }

    pub fn io_write_index(&mut self, val: u8) {
        self.index = val & 0x7F;
    }

    pub fn io_read_data(&mut self) -> u8 {
        let idx = self.index;
        if idx < REG_A && self.phase != UpdatePhase::Idle {
            return 0xFF;
        }
        match idx {
            REG_C => {
                let val = self.ram[REG_C as usize];
                self.ram[REG_C as usize] = 0;
                self.recompute_irqf();
                val
            }
            REG_CHECKSUM_LO => (self.equipment_checksum() & 0xFF) as u8,
            REG_CHECKSUM_HI => (self.equipment_checksum() >> 8) as u8,
            _ => self.ram[idx as usize],
        }
    }

    pub fn io_write_data(&mut self, val: u8) {
        let idx = self.index;
        match idx {
            REG_A => {
                self.ram[idx as usize] = val & 0x7F; // UIP is read-only
                self.update_pie_rate();
            }
            REG_C | REG_D => {} // read-only status registers
            REG_B => {
                self.ram[idx as usize] = val;
                self.recompute_irqf();
            }
            _ => self.ram[idx as usize] = val,
        }
    }

    /// Direct CMOS RAM access for a host bootstrap path (equipment byte,
    /// memory size, boot order) that never goes through ports 0x70/0x71.
    pub fn cmos_ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }

    pub fn cmos_ram_mut(&mut self) -> &mut [u8; RAM_SIZE] {
        &mut self.ram
    }
}

fn bcd_to_bin(v: u8) -> u8 {
    (v & 0x0F) + (v >> 4) * 10
}

fn bin_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

fn to_12_hour(hour24: u8) -> (u8, bool) {
    let pm = hour24 >= 12;
    let h = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    (h, pm)
}

fn from_12_hour(h12: u8, pm: bool) -> u8 {
    let base = if h12 == 12 { 0 } else { h12 };
    if pm {
        base + 12
    } else {
        base
    }
}

fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(month: u8, year: u16) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

/// First Sunday of April 02:00 -> 03:00 (spring forward); last Sunday of
/// October 02:00 -> 01:00 (fall back), applied the instant the clock would
/// otherwise read 02:00:00 on the transition day.
fn apply_dst(hour24: &mut u8, minute: &mut u8, second: &mut u8, dow: u8, dom: u8, month: u8) {
    let is_sunday = dow == 1; // register convention: 1 = Sunday
    if !is_sunday {
        return;
    }
    if month == 4 && *hour24 == 2 && *minute == 0 && *second == 0 {
        let week_of_month = (dom - 1) / 7;
        if week_of_month == 0 {
            *hour24 = 3;
        }
    } else if month == 10 && *hour24 == 2 && *minute == 0 && *second == 0 {
        let is_last_sunday = dom + 7 > days_in_month(month, 2000);
        if is_last_sunday {
            *hour24 = 1;
        }
    }
}

impl Device for Rtc {
    fn next_event_cc(&self, _clock: &Clock) -> u64 {
        let to_next_phase = match self.phase {
            UpdatePhase::Idle => self
                .cc_per_us
                .saturating_mul(SET_UIP_US)
                .saturating_sub(self.elapsed_cc),
            UpdatePhase::Uip => self
                .cc_per_us
                .saturating_mul(START_UPDATE_US)
                .saturating_sub(self.elapsed_cc),
            UpdatePhase::Updating => self
                .cc_per_us
                .saturating_mul(FINISH_UPDATE_US)
                .saturating_sub(self.elapsed_cc),
        }
        .max(1);
        to_next_phase.min(self.pie.cc_until_next_tick())
    }

    fn end_iter(&mut self, clock: &Clock) {
        // `elapsed_cc` tracks position within the current second; `clock.now`
        // is this sweep's delta (§4.1), so it accumulates here and is
        // brought back under `finish_update_cc` at each second boundary
        // below rather than being overwritten from `clock.now` directly.
        self.elapsed_cc += clock.now;

        let set_uip_cc = self.cc_per_us * SET_UIP_US;
        let start_update_cc = self.cc_per_us * START_UPDATE_US;
        let finish_update_cc = self.cc_per_us * FINISH_UPDATE_US;

        if self.phase == UpdatePhase::Idle && self.elapsed_cc >= set_uip_cc {
            self.ram[REG_A as usize] |= 0x80; // UIP
            self.phase = UpdatePhase::Uip;
        }
        if self.phase == UpdatePhase::Uip && self.elapsed_cc >= start_update_cc {
            self.phase = UpdatePhase::Updating;
        }
        if self.phase == UpdatePhase::Updating && self.elapsed_cc >= finish_update_cc {
            self.ram[REG_A as usize] &= !0x80;
            self.finish_update();
            self.phase = UpdatePhase::Idle;
            self.elapsed_cc -= finish_update_cc;
        }

        let ticks = self.pie.advance(clock.now);
        if ticks > 0 && self.rate_select() != 0 {
            self.raise_flag(0x40); // PF
        }
    }

    fn reset(&mut self) {
        let ram = self.ram;
        *self = Self::new(self.cc_per_second);
        // Calendar/alarm registers survive a platform reset on real
        // hardware (battery-backed); only the transient phase state and
        // status register are cleared.
        self.ram[..REG_A as usize].copy_from_slice(&ram[..REG_A as usize]);
        self.ram[0x0E..].copy_from_slice(&ram[0x0E..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_time() -> BootTime {
        BootTime {
            second: 59,
            minute: 59,
            hour: 23,
            day_of_week: 7,
            day_of_month: 31,
            month: 12,
            year: 1999,
        }
    }

    #[test]
    fn bcd_round_trip() {
        assert_eq!(bcd_to_bin(0x59), 59);
        assert_eq!(bin_to_bcd(59), 0x59);
    }

    #[test]
    fn update_cycle_rolls_seconds_into_minutes() {
        let mut rtc = Rtc::new(1_000_000); // 1 MHz for cheap cycle math
        rtc.ram[REG_B as usize] = 0x06; // 24h, binary, update enabled
        rtc.ram[REG_SECONDS as usize] = 59;
        rtc.ram[REG_MINUTES as usize] = 10;

        let clock = Clock {
            now: rtc.cc_per_us * FINISH_UPDATE_US + 1,
            freq_hz: 1_000_000,
            next_event_cc: u64::MAX,
        };
        rtc.end_iter(&clock);

        assert_eq!(rtc.ram[REG_SECONDS as usize], 0);
        assert_eq!(rtc.ram[REG_MINUTES as usize], 11);
    }

    #[test]
    fn year_rollover_spanning_century_via_seed() {
        let mut rtc = Rtc::new(1_000_000);
        rtc.seed_time(boot_time());
        rtc.ram[REG_B as usize] = 0x06;

        let clock = Clock {
            now: rtc.cc_per_us * FINISH_UPDATE_US + 1,
            freq_hz: 1_000_000,
            next_event_cc: u64::MAX,
        };
        rtc.end_iter(&clock);

        assert_eq!(rtc.ram[REG_SECONDS as usize], 0);
        assert_eq!(rtc.ram[REG_MINUTES as usize], 0);
        assert_eq!(rtc.ram[REG_HOURS as usize], 0);
        assert_eq!(rtc.ram[REG_DAY_OF_MONTH as usize], 1);
        assert_eq!(rtc.ram[REG_MONTH as usize], 1);
        assert_eq!(rtc.ram[REG_YEAR as usize], 0);
        assert_eq!(rtc.ram[REG_CENTURY as usize], 20);
    }

    #[test]
    fn dst_spring_forward_skips_the_02_00_hour() {
        let mut rtc = Rtc::new(1_000_000);
        rtc.ram[REG_B as usize] = 0x07; // 24h, binary, update enabled, DSE
        rtc.ram[REG_HOURS as usize] = 1;
        rtc.ram[REG_MINUTES as usize] = 59;
        rtc.ram[REG_SECONDS as usize] = 59;
        rtc.ram[REG_DAY_OF_WEEK as usize] = 1; // Sunday
        rtc.ram[REG_DAY_OF_MONTH as usize] = 1; // first Sunday of the month
        rtc.ram[REG_MONTH as usize] = 4;

        let clock = Clock {
            now: rtc.cc_per_us * FINISH_UPDATE_US + 1,
            freq_hz: 1_000_000,
            next_event_cc: u64::MAX,
        };
        rtc.end_iter(&clock);

        assert_eq!(rtc.ram[REG_HOURS as usize], 3, "02:00:00 must jump straight to 03:00:00");
        assert_eq!(rtc.ram[REG_MINUTES as usize], 0);
        assert_eq!(rtc.ram[REG_SECONDS as usize], 0);
    }

    #[test]
    fn alarm_match_raises_af_and_irq8() {
        let mut rtc = Rtc::new(1_000_000);
        rtc.ram[REG_B as usize] = 0x26; // 24h, binary, AIE
        rtc.ram[REG_SECONDS as usize] = 29;
        rtc.ram[REG_SECONDS_ALARM as usize] = 30;
        rtc.ram[REG_MINUTES_ALARM as usize] = 0xC0;
        rtc.ram[REG_HOURS_ALARM as usize] = 0xC0;

        let clock = Clock {
            now: rtc.cc_per_us * FINISH_UPDATE_US + 1,
            freq_hz: 1_000_000,
            next_event_cc: u64::MAX,
        };
        rtc.end_iter(&clock);

        assert_eq!(rtc.ram[REG_SECONDS as usize], 30);
        assert!(rtc.irq_level(), "AIE + AF must assert IRQF");
    }

    #[test]
    fn register_c_clears_on_read() {
        let mut rtc = Rtc::new(1_000_000);
        rtc.ram[REG_B as usize] = 0x10; // UIE only
        rtc.ram[REG_SECONDS as usize] = 59;

        let clock = Clock {
            now: rtc.cc_per_us * FINISH_UPDATE_US + 1,
            freq_hz: 1_000_000,
            next_event_cc: u64::MAX,
        };
        rtc.end_iter(&clock);
        assert!(rtc.irq_level());

        rtc.io_write_index(REG_C);
        let status = rtc.io_read_data();
        assert_eq!(status & 0x90, 0x90, "IRQF and UF both set");
        assert!(!rtc.irq_level(), "reading register C clears the flags");
    }

    #[test]
    fn reads_during_update_return_all_ones() {
        let mut rtc = Rtc::new(1_000_000);
        rtc.phase = UpdatePhase::Uip;
        rtc.io_write_index(REG_SECONDS);
        assert_eq!(rtc.io_read_data(), 0xFF);
    }
}
