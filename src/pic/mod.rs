/*!
Dual 8259A programmable interrupt controllers with ELCR and PCI IRQ routing
(spec §4.3).

Two chips, master (IRQ 0-7, ports `0x20/0x21`) and slave (IRQ 8-15, ports
`0xA0/0xA1`), cascaded through the master's IRQ2 input. Only the default
configuration is modeled: edge/level as selected by ELCR (`0x4D0/0x4D1`),
cascade mode, normal (non-auto) EOI unless ICW4 requests it, and the
ordinary (not special-fully-nested) priority scheme.

Grounded on the ICW1-4/OCW1-3 register layout documented by the 8259
drivers in the retrieval pack (`pic.rs` from two different bare-metal
kernels), reshaped from "an OS driving real hardware" into "emulating the
chip an OS drives": the state machine, register names and priority-rotation
rules are the same, just observed from the other side of the bus.
*/

use crate::scheduler::{Clock, Device};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IcwStep {
    Idle,
    Icw2,
    Icw3,
    Icw4,
}

/// One physical 8259A. `local` IRQ numbers are 0-7 on both chips; the pair
/// wrapper below maps global IRQ 0-15 onto master/slave + local number.
#[derive(Debug, Clone)]
struct Pic8259 {
    irr: u8,
    isr: u8,
    imr: u8,
    /// Raw input level per local IRQ line, used to detect edge transitions.
    raw_level: [bool; 8],
    icw_step: IcwStep,
    icw1: u8,
    icw3: u8,
    vector_base: u8,
    auto_eoi: bool,
    special_mask: bool,
    /// OCW3 read-register select: `true` selects ISR, `false` selects IRR.
    read_isr: bool,
    /// Local IRQ with the current highest priority (rotates under the
    /// rotate-on-EOI / set-priority commands); 0 at reset.
    priority_rotation: u8,
    last_irq: Option<u8>,
    out: bool,
}

impl Default for Pic8259 {
    fn default() -> Self {
        Self {
            irr: 0,
            isr: 0,
            imr: 0xFF,
            raw_level: [false; 8],
            icw_step: IcwStep::Idle,
            icw1: 0,
            icw3: 0,
            vector_base: 0,
            auto_eoi: false,
            special_mask: false,
            read_isr: false,
            priority_rotation: 0,
            last_irq: None,
            out: false,
        }
    }
}

impl Pic8259 {
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Apply an input transition on local line `local` (0-7). `edge`
    /// selects edge- vs level-triggered semantics per ELCR.
    fn set_line(&mut self, local: u8, level: bool, edge: bool) {
        let bit = 1u8 << local;
        let was = self.raw_level[local as usize];
        self.raw_level[local as usize] = level;
        if edge {
            if level && !was {
                self.irr |= bit;
            }
        } else if level {
            self.irr |= bit;
        } else {
            self.irr &= !bit;
        }
    }

    /// Walk priority order from `priority_rotation`; a candidate is raised
    /// unless masked by IMR or blocked by an ISR bit at or above its own
    /// priority (unless special-mask mode is active).
    fn update_out(&mut self) -> bool {
        for i in 0..8u8 {
            let irq = (self.priority_rotation + i) % 8;
            let bit = 1u8 << irq;
            if self.irr & bit == 0 || self.imr & bit != 0 {
                continue;
            }
            let higher_in_service = (0..=i).any(|j| {
                let other = (self.priority_rotation + j) % 8;
                self.isr & (1 << other) != 0
            });
            if higher_in_service && !self.special_mask {
                continue;
            }
            self.last_irq = Some(irq);
            self.out = true;
            return true;
        }
        self.last_irq = None;
        self.out = false;
        false
    }

    fn highest_isr_irq(&self) -> Option<u8> {
        (0..8u8)
            .map(|i| (self.priority_rotation + i) % 8)
            .find(|&irq| self.isr & (1 << irq) != 0)
    }

    fn write_control(&mut self, val: u8) {
        if val & 0x10 != 0 {
            // ICW1: start initialization sequence.
            self.icw1 = val;
            self.irr = 0;
            self.isr = 0;
            self.imr = 0;
            self.special_mask = false;
            self.read_isr = false;
            self.priority_rotation = 0;
            self.icw_step = IcwStep::Icw2;
            return;
        }
        if self.icw_step != IcwStep::Idle {
            // Control port only ever sees ICW1, OCW2 and OCW3; a stray
            // write mid-sequence is ignored rather than corrupting state.
            return;
        }
        if val & 0x08 != 0 {
            self.write_ocw3(val);
        } else {
            self.write_ocw2(val);
        }
    }

    fn write_ocw2(&mut self, val: u8) {
        let rotate = val & 0x80 != 0;
        let specific = val & 0x40 != 0;
        let eoi = val & 0x20 != 0;
        let level = val & 0x07;
        if eoi {
            let irq = if specific {
                level
            } else {
                self.highest_isr_irq().unwrap_or(level)
            };
            self.isr &= !(1 << irq);
            if rotate {
                self.priority_rotation = (irq + 1) % 8;
            }
        } else if rotate {
            // Set-priority command: rotate without touching ISR.
            self.priority_rotation = (level + 1) % 8;
        }
    }

    fn write_ocw3(&mut self, val: u8) {
        if val & 0x02 != 0 {
            self.read_isr = val & 0x01 != 0;
        }
        if val & 0x40 != 0 {
            self.special_mask = val & 0x20 != 0;
        }
    }

    fn read_control(&self) -> u8 {
        if self.read_isr {
            self.isr
        } else {
            self.irr
        }
    }

    fn write_data(&mut self, val: u8) {
        match self.icw_step {
            IcwStep::Icw2 => {
                self.vector_base = val & 0xF8;
                self.icw_step = if self.icw1 & 0x02 != 0 {
                    self.finish_or_icw4()
                } else {
                    IcwStep::Icw3
                };
            }
            IcwStep::Icw3 => {
                self.icw3 = val;
                self.icw_step = self.finish_or_icw4();
            }
            IcwStep::Icw4 => {
                self.auto_eoi = val & 0x02 != 0;
                self.icw_step = IcwStep::Idle;
            }
            IcwStep::Idle => self.imr = val,
        }
    }

    fn finish_or_icw4(&self) -> IcwStep {
        if self.icw1 & 0x01 != 0 {
            IcwStep::Icw4
        } else {
            IcwStep::Idle
        }
    }

    fn read_data(&self) -> u8 {
        self.imr
    }
}

/// PCI PIRQA-D routing register: an enable bit plus a target ISA IRQ. IRQ
/// values 2, 8 and 13 are reserved (cascade, RTC, FPU) and rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PirqRoute {
    pub enabled: bool,
    pub irq: u8,
}

const RESERVED_IRQS: [u8; 3] = [2, 8, 13];

/// Narrow capability interface a device uses to raise/lower its own IRQ
/// line without reaching into the controller's other internals.
pub trait IrqLine {
    fn set_irq(&mut self, irq: u8, level: bool);
}

pub struct InterruptControllerPair {
    master: Pic8259,
    slave: Pic8259,
    /// Edge (`false`) / level (`true`) trigger mode per global IRQ 0-15,
    /// indexed directly; IRQ0, 1, 2, 8 and 13 are fixed edge-triggered on
    /// real PIIX4 hardware and ELCR writes to those bits are ignored.
    elcr: [bool; 16],
    pirq: [PirqRoute; 4],
    /// Input level currently latched per PCI PIRQ line, so a route change
    /// can be re-applied without the PCI device re-asserting.
    pirq_level: [bool; 4],
}

const FIXED_EDGE_IRQS: [u8; 5] = [0, 1, 2, 8, 13];

impl Default for InterruptControllerPair {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControllerPair {
    pub fn new() -> Self {
        Self {
            master: Pic8259::default(),
            slave: Pic8259::default(),
            elcr: [false; 16],
            pirq: [PirqRoute::default(); 4],
            pirq_level: [false; 4],
        }
    }

    fn is_level(&self, irq: u8) -> bool {
        self.elcr[irq as usize]
    }

    fn chip_mut(&mut self, irq: u8) -> (&mut Pic8259, u8) {
        if irq < 8 {
            (&mut self.master, irq)
        } else {
            (&mut self.slave, irq - 8)
        }
    }

    /// Recompute both chips' outputs and cascade the slave through the
    /// master's IRQ2 input.
    fn update_outputs(&mut self) {
        self.slave.update_out();
        let slave_out = self.slave.out;
        let cascade_edge = !self.is_level(2);
        self.master.set_line(2, slave_out, cascade_edge);
        self.master.update_out();
    }

    pub fn io_read(&self, port: u16) -> u8 {
        match port {
            0x20 => self.master.read_control(),
            0x21 => self.master.read_data(),
            0xA0 => self.slave.read_control(),
            0xA1 => self.slave.read_data(),
            0x4D0 => elcr_byte(&self.elcr[0..8]),
            0x4D1 => elcr_byte(&self.elcr[8..16]),
            _ => 0xFF,
        }
    }

    pub fn io_write(&mut self, port: u16, val: u8) {
        match port {
            0x20 => {
                self.master.write_control(val);
                self.update_outputs();
            }
            0x21 => {
                self.master.write_data(val);
                self.update_outputs();
            }
            0xA0 => {
                self.slave.write_control(val);
                self.update_outputs();
            }
            0xA1 => {
                self.slave.write_data(val);
                self.update_outputs();
            }
            0x4D0 => self.write_elcr(0, val),
            0x4D1 => self.write_elcr(8, val),
            _ => {}
        }
    }

    fn write_elcr(&mut self, base: u8, val: u8) {
        for bit in 0..8u8 {
            let irq = base + bit;
            if FIXED_EDGE_IRQS.contains(&irq) {
                continue;
            }
            self.elcr[irq as usize] = val & (1 << bit) != 0;
        }
    }

    /// Program one of the four PIRQA-D routing registers. Per §4.3, target
    /// IRQs 2, 8 and 13 are illegal and the route is left disabled.
    pub fn set_pirq_route(&mut self, index: usize, enabled: bool, irq: u8) {
        if RESERVED_IRQS.contains(&irq) {
            self.pirq[index] = PirqRoute {
                enabled: false,
                irq,
            };
            return;
        }
        self.pirq[index] = PirqRoute { enabled, irq };
        self.apply_pirq(index);
    }

    /// A PCI function asserts/deasserts its INT# line, which the
    /// corresponding PIRQx register ORs into the routed ISA IRQ.
    pub fn set_pci_irq(&mut self, pirq_index: usize, level: bool) {
        self.pirq_level[pirq_index] = level;
        self.apply_pirq(pirq_index);
    }

    fn apply_pirq(&mut self, index: usize) {
        let route = self.pirq[index];
        if !route.enabled {
            return;
        }
        let level = self.pirq_level[index];
        self.set_irq(route.irq, level);
    }

    /// Interrupt-acknowledge handshake: resolve the highest-priority
    /// pending IRQ (cascading through the slave if it is the source), set
    /// its ISR bit, and return `vector_base | irq`.
    pub fn acknowledge(&mut self) -> u8 {
        self.master.update_out();
        let Some(master_irq) = self.master.last_irq else {
            return self.master.vector_base;
        };
        if master_irq == 2 {
            self.slave.update_out();
            let slave_irq = self.slave.last_irq.unwrap_or(0);
            self.slave.isr |= 1 << slave_irq;
            if self.slave.auto_eoi {
                self.slave.isr &= !(1 << slave_irq);
            }
            self.master.isr |= 1 << 2;
            if self.master.auto_eoi {
                self.master.isr &= !(1 << 2);
            }
            self.update_outputs();
            self.slave.vector_base | slave_irq
        } else {
            self.master.isr |= 1 << master_irq;
            if self.master.auto_eoi {
                self.master.isr &= !(1 << master_irq);
            }
            self.update_outputs();
            self.master.vector_base | master_irq
        }
    }

    /// Whether the master's OUT pin (and thus the CPU's INTR input) is
    /// currently asserted.
    pub fn intr_asserted(&self) -> bool {
        self.master.out
    }
}

impl IrqLine for InterruptControllerPair {
    fn set_irq(&mut self, irq: u8, level: bool) {
        let is_level = self.is_level(irq);
        let (chip, local) = self.chip_mut(irq);
        chip.set_line(local, level, !is_level);
        self.update_outputs();
    }
}

fn elcr_byte(bits: &[bool]) -> u8 {
    bits.iter()
        .enumerate()
        .fold(0u8, |acc, (i, &b)| acc | ((b as u8) << i))
}

impl Device for InterruptControllerPair {
    fn next_event_cc(&self, _clock: &Clock) -> u64 {
        // Purely reactive to port writes and IRQ-line transitions; no
        // internally clocked event of its own.
        u64::MAX / 2
    }

    fn end_iter(&mut self, _clock: &Clock) {}

    fn reset(&mut self) {
        self.master.reset();
        self.slave.reset();
        self.elcr = [false; 16];
        self.pirq = [PirqRoute::default(); 4];
        self.pirq_level = [false; 4];
    }
}
