//! C64 configuration: model selection and ROM images.

/// CPU clock frequency of the PAL C64 in Hz.
pub const PAL_CLOCK: u32 = 985_249;

/// CPU clock frequency of the NTSC C64 in Hz.
pub const NTSC_CLOCK: u32 = 1_022_727;

/// Physical raster line in which the NTSC 6567 wraps its Y counter.
///
/// Chip revision dependent; revision R8 uses 238, some earlier revisions
/// wrap at 237. This core models 238.
pub const NTSC_YCOUNTER_OVERFLOW_LINE: u16 = 238;

/// C64 model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C64Model {
    /// PAL C64 (6569 VIC-II, 985,249 Hz CPU).
    C64Pal,
    /// NTSC C64 (6567 VIC-II, 1,022,727 Hz CPU).
    C64Ntsc,
}

impl C64Model {
    /// CPU clock frequency in Hz.
    #[must_use]
    pub fn clock_frequency(self) -> u32 {
        match self {
            Self::C64Pal => PAL_CLOCK,
            Self::C64Ntsc => NTSC_CLOCK,
        }
    }

    /// Raster lines per frame.
    #[must_use]
    pub fn rasterlines_per_frame(self) -> u16 {
        match self {
            Self::C64Pal => 312,
            Self::C64Ntsc => 263,
        }
    }

    /// CPU cycles per raster line.
    #[must_use]
    pub fn cycles_per_rasterline(self) -> u8 {
        match self {
            Self::C64Pal => 63,
            Self::C64Ntsc => 65,
        }
    }

    /// CPU cycles per frame.
    #[must_use]
    pub fn cycles_per_frame(self) -> u32 {
        u32::from(self.rasterlines_per_frame()) * u32::from(self.cycles_per_rasterline())
    }

    /// Master clock cycles per TOD tick (1/10 s of simulated time).
    #[must_use]
    pub fn cycles_per_tod_tick(self) -> u32 {
        self.clock_frequency() / 10
    }

    #[must_use]
    pub fn is_pal(self) -> bool {
        self == Self::C64Pal
    }
}

/// Configuration for constructing a C64 instance.
pub struct C64Config {
    /// Model variant.
    pub model: C64Model,
    /// Kernal ROM (8,192 bytes).
    pub kernal_rom: Vec<u8>,
    /// BASIC ROM (8,192 bytes).
    pub basic_rom: Vec<u8>,
    /// Character ROM (4,096 bytes).
    pub char_rom: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_geometry() {
        assert_eq!(C64Model::C64Pal.cycles_per_frame(), 19_656);
        assert_eq!(C64Model::C64Ntsc.cycles_per_frame(), 17_095);
    }

    #[test]
    fn clock_frequencies() {
        assert_eq!(C64Model::C64Pal.clock_frequency(), 985_249);
        assert_eq!(C64Model::C64Ntsc.clock_frequency(), 1_022_727);
    }
}
