//! Board definitions for the BeagleBone Black (TI AM335x)
//!
//! Register map of the four GPIO controller banks and the expansion header
//! pin-out. The pin-out is fixed by the board and never re-derived at runtime.

/// Memory map for AM335x GPIO banks
pub mod am335x {
    /// GPIO0 base address
    pub const GPIO0_BASE: usize = 0x44E0_7000;
    /// GPIO1 base address
    pub const GPIO1_BASE: usize = 0x4804_C000;
    /// GPIO2 base address
    pub const GPIO2_BASE: usize = 0x481A_C000;
    /// GPIO3 base address
    pub const GPIO3_BASE: usize = 0x481A_E000;

    /// Bank bases indexed by bank number
    pub const GPIO_BANKS: [usize; 4] = [GPIO0_BASE, GPIO1_BASE, GPIO2_BASE, GPIO3_BASE];

    /// Size of one mapped register window
    pub const GPIO_WINDOW_LEN: usize = 4096;
    /// Lines per bank
    pub const LINES_PER_BANK: u8 = 32;

    /// Output enable (0 = output)
    pub const GPIO_OE: usize = 0x134;
    /// Data input
    pub const GPIO_DATAIN: usize = 0x138;
    /// Data output
    pub const GPIO_DATAOUT: usize = 0x13C;
    /// Write-1-to-clear data output
    pub const GPIO_CLEARDATAOUT: usize = 0x190;
    /// Write-1-to-set data output
    pub const GPIO_SETDATAOUT: usize = 0x194;
}

/// Expansion header pin, valued by its logical GPIO number
/// (`bank * 32 + bit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pin(u8);

impl Pin {
    pub const USR0: Pin = Pin(53);
    pub const USR1: Pin = Pin(54);
    pub const USR2: Pin = Pin(55);
    pub const USR3: Pin = Pin(56);

    pub const P8_3: Pin = Pin(38);
    pub const P8_4: Pin = Pin(39);
    pub const P8_5: Pin = Pin(34);
    pub const P8_6: Pin = Pin(35);
    pub const P8_7: Pin = Pin(66);
    pub const P8_8: Pin = Pin(67);
    pub const P8_9: Pin = Pin(69);
    pub const P8_10: Pin = Pin(68);
    pub const P8_11: Pin = Pin(45);
    pub const P8_12: Pin = Pin(44);
    pub const P8_13: Pin = Pin(23);
    pub const P8_14: Pin = Pin(26);
    pub const P8_15: Pin = Pin(47);
    pub const P8_16: Pin = Pin(46);
    pub const P8_17: Pin = Pin(27);
    pub const P8_18: Pin = Pin(65);
    pub const P8_19: Pin = Pin(22);
    pub const P8_20: Pin = Pin(63);
    pub const P8_21: Pin = Pin(62);
    pub const P8_22: Pin = Pin(37);
    pub const P8_23: Pin = Pin(36);
    pub const P8_24: Pin = Pin(33);
    pub const P8_25: Pin = Pin(32);
    pub const P8_26: Pin = Pin(61);
    pub const P8_27: Pin = Pin(86);
    pub const P8_28: Pin = Pin(88);
    pub const P8_29: Pin = Pin(87);
    pub const P8_30: Pin = Pin(89);
    pub const P8_31: Pin = Pin(10);
    pub const P8_32: Pin = Pin(11);
    pub const P8_33: Pin = Pin(9);
    pub const P8_34: Pin = Pin(81);
    pub const P8_35: Pin = Pin(8);
    pub const P8_36: Pin = Pin(80);
    pub const P8_37: Pin = Pin(78);
    pub const P8_38: Pin = Pin(79);
    pub const P8_39: Pin = Pin(76);
    pub const P8_40: Pin = Pin(77);
    pub const P8_41: Pin = Pin(74);
    pub const P8_42: Pin = Pin(75);
    pub const P8_43: Pin = Pin(72);
    pub const P8_44: Pin = Pin(73);
    pub const P8_45: Pin = Pin(70);
    pub const P8_46: Pin = Pin(71);

    pub const P9_11: Pin = Pin(30);
    pub const P9_12: Pin = Pin(60);
    pub const P9_13: Pin = Pin(31);
    pub const P9_14: Pin = Pin(50);
    pub const P9_15: Pin = Pin(48);
    pub const P9_16: Pin = Pin(51);
    pub const P9_17: Pin = Pin(5);
    pub const P9_18: Pin = Pin(4);
    pub const P9_19: Pin = Pin(13);
    pub const P9_20: Pin = Pin(12);
    pub const P9_21: Pin = Pin(3);
    pub const P9_22: Pin = Pin(2);
    pub const P9_23: Pin = Pin(49);
    pub const P9_24: Pin = Pin(15);
    pub const P9_25: Pin = Pin(117);
    pub const P9_26: Pin = Pin(14);
    pub const P9_27: Pin = Pin(115);
    pub const P9_28: Pin = Pin(113);
    pub const P9_29: Pin = Pin(111);
    pub const P9_30: Pin = Pin(112);
    pub const P9_31: Pin = Pin(110);
    pub const P9_41: Pin = Pin(20);
    pub const P9_42: Pin = Pin(7);

    /// Pin from a raw logical GPIO number. Range is checked on resolution.
    pub const fn from_gpio(number: u8) -> Self {
        Pin(number)
    }

    /// Logical GPIO number
    pub const fn gpio(&self) -> u8 {
        self.0
    }

    /// Bank index (0..=3 for valid pins)
    pub const fn bank(&self) -> usize {
        (self.0 / am335x::LINES_PER_BANK) as usize
    }

    /// Bit offset inside the bank
    pub const fn bit(&self) -> u32 {
        (self.0 % am335x::LINES_PER_BANK) as u32
    }

    /// Look up a header pin by name, e.g. `"P9_17"`, `"p8.11"` or `"USR0"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .map(|c| if c == '.' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        let normalized = match normalized.strip_prefix("USR_") {
            Some(rest) => format!("USR{rest}"),
            None => normalized,
        };

        PINOUT
            .iter()
            .find(|(pin_name, _)| *pin_name == normalized)
            .map(|(_, pin)| *pin)
    }
}

/// Expansion header pin-out
pub static PINOUT: &[(&str, Pin)] = &[
    ("USR0", Pin::USR0),
    ("USR1", Pin::USR1),
    ("USR2", Pin::USR2),
    ("USR3", Pin::USR3),
    ("P8_3", Pin::P8_3),
    ("P8_4", Pin::P8_4),
    ("P8_5", Pin::P8_5),
    ("P8_6", Pin::P8_6),
    ("P8_7", Pin::P8_7),
    ("P8_8", Pin::P8_8),
    ("P8_9", Pin::P8_9),
    ("P8_10", Pin::P8_10),
    ("P8_11", Pin::P8_11),
    ("P8_12", Pin::P8_12),
    ("P8_13", Pin::P8_13),
    ("P8_14", Pin::P8_14),
    ("P8_15", Pin::P8_15),
    ("P8_16", Pin::P8_16),
    ("P8_17", Pin::P8_17),
    ("P8_18", Pin::P8_18),
    ("P8_19", Pin::P8_19),
    ("P8_20", Pin::P8_20),
    ("P8_21", Pin::P8_21),
    ("P8_22", Pin::P8_22),
    ("P8_23", Pin::P8_23),
    ("P8_24", Pin::P8_24),
    ("P8_25", Pin::P8_25),
    ("P8_26", Pin::P8_26),
    ("P8_27", Pin::P8_27),
    ("P8_28", Pin::P8_28),
    ("P8_29", Pin::P8_29),
    ("P8_30", Pin::P8_30),
    ("P8_31", Pin::P8_31),
    ("P8_32", Pin::P8_32),
    ("P8_33", Pin::P8_33),
    ("P8_34", Pin::P8_34),
    ("P8_35", Pin::P8_35),
    ("P8_36", Pin::P8_36),
    ("P8_37", Pin::P8_37),
    ("P8_38", Pin::P8_38),
    ("P8_39", Pin::P8_39),
    ("P8_40", Pin::P8_40),
    ("P8_41", Pin::P8_41),
    ("P8_42", Pin::P8_42),
    ("P8_43", Pin::P8_43),
    ("P8_44", Pin::P8_44),
    ("P8_45", Pin::P8_45),
    ("P8_46", Pin::P8_46),
    ("P9_11", Pin::P9_11),
    ("P9_12", Pin::P9_12),
    ("P9_13", Pin::P9_13),
    ("P9_14", Pin::P9_14),
    ("P9_15", Pin::P9_15),
    ("P9_16", Pin::P9_16),
    ("P9_17", Pin::P9_17),
    ("P9_18", Pin::P9_18),
    ("P9_19", Pin::P9_19),
    ("P9_20", Pin::P9_20),
    ("P9_21", Pin::P9_21),
    ("P9_22", Pin::P9_22),
    ("P9_23", Pin::P9_23),
    ("P9_24", Pin::P9_24),
    ("P9_25", Pin::P9_25),
    ("P9_26", Pin::P9_26),
    ("P9_27", Pin::P9_27),
    ("P9_28", Pin::P9_28),
    ("P9_29", Pin::P9_29),
    ("P9_30", Pin::P9_30),
    ("P9_31", Pin::P9_31),
    ("P9_41", Pin::P9_41),
    ("P9_42", Pin::P9_42),
];
