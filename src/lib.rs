#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

//! # BM280 Environmental Sensor Driver
//!
//! A type-safe, `no_std` driver for the Bosch BME280 (temperature, pressure,
//! humidity) and its humidity-less sibling, the BMP280, on top of the
//! [`embedded-hal`](embedded_hal) 1.0 I2C and delay traits.
//! The typestate pattern ensures that calibration data is loaded before any
//! measurement can be taken.
//!
//! ## Features
//! - **Flexible Configuration**: Individually skip Temperature, Pressure or
//!   Humidity, select IIR filter, power mode and standby interval.
//! - **Fixed-Point Arithmetic**: Bosch's integer compensation formulas, no FPU required.
//! - **Multiple Units**: Every handle carries its own address and calibration;
//!   there is no global state.
//! - **Logging**: Optional, via the `defmt` or `log` feature.
//!
//! ## Units
//! - **Temperature**: Centigrade (C * 100) -> 2508 = 25.08 °C
//! - **Pressure**: Q24.8 Pascal (Pa * 256) -> 25767233 = 100653.25 Pa
//! - **Humidity**: Q22.10 percent (RH % * 1024) -> 56317 = 54.997 %
//!
//! ## Example
//! ```no_run
//! use bm280_driver::{error::Bm280Error, Address, Bm280, Config, Standby};
//! use embedded_hal::{delay::DelayNs, i2c::I2c};
//!
//! fn log_once<I2C: I2c, D: DelayNs>(i2c: I2C, delay: &mut D) -> Result<(), Bm280Error<I2C::Error>> {
//!     let mut sensor = Bm280::new(i2c, Address::SdoGnd).init(delay)?;
//!     sensor.apply(&Config::indoor(Standby::Ms1000))?;
//!
//!     let data = sensor.read_data(delay)?;
//!     if let Some(temp) = data.temp {
//!         let (whole, fraction) = temp.split();
//!         # let _ = (whole, fraction);
//!     }
//!     Ok(())
//! }
//! ```

#[macro_use]
mod fmt;

mod calc;
pub mod calibration;
pub mod settings;
pub mod timing;

pub use calc::{compensate, ADC_SKIPPED_16, ADC_SKIPPED_20};
pub use calibration::CalibData;
pub use settings::{
    Config, ConfigBuilder, IIRFilter, InvalidConfig, Oversampling, OversamplingConfig, PowerMode,
    Standby,
};
pub use timing::{measurement_time, Deadline, Microseconds};

use core::marker::PhantomData;
use embedded_hal::{delay::DelayNs, i2c};

/// Register map.
mod regs {
    pub const CHIP_ID: u8 = 0xD0;
    pub const RESET: u8 = 0xE0;
    pub const CTRL_HUM: u8 = 0xF2;
    pub const STATUS: u8 = 0xF3;
    pub const CTRL_MEAS: u8 = 0xF4;
    pub const CONFIG: u8 = 0xF5;

    pub const RESET_CMD: u8 = 0xB6;
    /// `ctrl_hum`, `status`, `ctrl_meas`, `config`.
    pub const CTRL_BLOCK_SIZE: usize = 4;
    pub const MODE_MASK: u8 = 0b11;

    pub const STATUS_MEASURING: u8 = 1 << 3;
    pub const STATUS_IM_UPDATE: u8 = 1 << 0;
}

/// Memory address and size for the measurement data registers.
mod raw_data_mem {
    pub const ADDR: u8 = 0xF7;
    /// press[3] + temp[3]
    pub const SIZE_TP: usize = 6;
    /// press[3] + temp[3] + hum[2]
    pub const SIZE_TPH: usize = 8;
}

mod chip_id {
    pub const BME280: u8 = 0x60;
    pub const BMP280: u8 = 0x58;
    /// Engineering samples of the BMP280.
    pub const BMP280_SAMPLES: [u8; 2] = [0x56, 0x57];
}

// --- Typestates ---

/// Sensor has been created but not yet initialized with calibration data.
#[derive(Debug)]
pub struct Uninitialized;
/// Sensor is initialized and its calibration data is loaded.
#[derive(Debug)]
pub struct Ready;

/// Error types for the BM280 driver.
pub mod error {
    use core::fmt;
    use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource};

    use crate::settings::InvalidConfig;

    /// Errors that can occur during communication or configuration.
    ///
    /// A channel that was not measured is not an error; it shows up as `None`
    /// in the [`Measurement`](crate::Measurement).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum Bm280Error<E> {
        /// Nothing acknowledged the device address.
        DeviceNotFound,
        /// Any other I2C bus error.
        BusError(E),
        /// The device answered with a chip id that is not a BME280/BMP280.
        UnknownChipId(u8),
        /// No configuration has been applied since init or reset.
        NotInitialized,
        /// A value outside the enumerated configuration settings.
        InvalidConfig,
        /// The configuration asks for humidity on a part without a humidity sensor.
        UnsupportedFeature,
        /// The measurement was not finished within its deadline plus grace period.
        Timeout,
    }

    impl<E: i2c::Error> Bm280Error<E> {
        pub(crate) fn from_bus(e: E) -> Self {
            match e.kind() {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => Self::DeviceNotFound,
                _ => Self::BusError(e),
            }
        }
    }

    impl<E> From<InvalidConfig> for Bm280Error<E> {
        fn from(_: InvalidConfig) -> Self {
            Self::InvalidConfig
        }
    }

    impl<E: fmt::Debug> fmt::Display for Bm280Error<E> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::DeviceNotFound => f.write_str("device did not acknowledge its address"),
                Self::BusError(e) => write!(f, "I2C bus error: {e:?}"),
                Self::UnknownChipId(id) => write!(f, "unknown chip id {id:#04x}"),
                Self::NotInitialized => f.write_str("no configuration applied"),
                Self::InvalidConfig => f.write_str("invalid configuration value"),
                Self::UnsupportedFeature => f.write_str("feature not supported by this device"),
                Self::Timeout => f.write_str("measurement timed out"),
            }
        }
    }

    impl<E: fmt::Debug> core::error::Error for Bm280Error<E> {}

    /// Result type alias for BM280 operations.
    pub type Result<T, E> = core::result::Result<T, Bm280Error<E>>;
}

/// I2C address of a unit, selected by the level of its SDO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Address {
    /// SDO tied to GND.
    #[default]
    SdoGnd = 0x76,
    /// SDO tied to VDDIO.
    SdoVddio = 0x77,
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address as u8
    }
}

impl TryFrom<u8> for Address {
    type Error = InvalidConfig;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x76 => Ok(Address::SdoGnd),
            0x77 => Ok(Address::SdoVddio),
            _ => Err(InvalidConfig),
        }
    }
}

/// Device family member, derived from the chip id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Variant {
    /// Temperature, pressure and humidity.
    Bme280,
    /// Temperature and pressure only.
    Bmp280,
}

impl Variant {
    /// Maps a chip id register value to its variant, `None` for foreign parts.
    pub fn from_chip_id(id: u8) -> Option<Self> {
        match id {
            chip_id::BME280 => Some(Variant::Bme280),
            chip_id::BMP280 => Some(Variant::Bmp280),
            id if chip_id::BMP280_SAMPLES.contains(&id) => Some(Variant::Bmp280),
            _ => None,
        }
    }

    /// Capability flag checked before humidity is configured or read.
    pub fn has_humidity(self) -> bool {
        matches!(self, Variant::Bme280)
    }
}

/// Raw ADC output read directly from the data registers.
///
/// Transient: fetched once per cycle and consumed by [`compensate`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawData {
    /// 20-bit temperature value.
    pub temp_adc: u32,
    /// 20-bit pressure value.
    pub press_adc: u32,
    /// 16-bit humidity value, `None` on parts without a humidity sensor.
    pub hum_adc: Option<u16>,
}

/// Intermediate temperature values used for compensation.
///
/// `t_fine` is required by the subsequent pressure and humidity formulas.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalcTempData {
    pub t_fine: i32,
    pub temp: Temperature,
}

/// Represents temperature in Centigrade (degrees Celsius * 100).
///
/// # Example
/// A value of `2508` represents **25.08 °C**.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature(pub i32);

impl Temperature {
    /// Splits the fixed-point value into integral (degrees) and fractional (decimals) parts.
    ///
    /// # Example
    /// ```rust
    /// use bm280_driver::Temperature;
    /// let temp = Temperature(2508);
    /// assert_eq!(temp.split(), (25, 8)); // Represents 25.08 °C
    /// ```
    pub fn split(&self) -> (i32, i32) {
        (self.0 / 100, self.0 % 100)
    }
}

/// Represents atmospheric pressure in Q24.8 Pascal (Pa * 256).
///
/// # Example
/// A value of `25767233` represents **100653.25 Pa**.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pressure(pub u32);

impl Pressure {
    /// Whole Pascal, fraction discarded.
    pub fn pascal(&self) -> u32 {
        self.0 >> 8
    }

    /// Pressure in hundredths of a Pascal.
    pub fn centi_pascal(&self) -> u64 {
        (u64::from(self.0) * 100) >> 8
    }

    /// Converts to Hectopascal (hPa) and splits it into parts.
    ///
    /// # Example
    /// ```rust
    /// use bm280_driver::Pressure;
    /// let press = Pressure(101_325 << 8);
    /// assert_eq!(press.as_hpa(), (1013, 25)); // Represents 1013.25 hPa
    /// ```
    pub fn as_hpa(&self) -> (u32, u32) {
        let pa = self.pascal();
        (pa / 100, pa % 100)
    }
}

/// Represents relative humidity in Q22.10 percent (percent * 1024).
///
/// # Example
/// A value of `56317` represents **54.997 %rH**.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Humidity(pub u32);

impl Humidity {
    /// Whole percent, fraction discarded.
    pub fn percent(&self) -> u32 {
        self.0 >> 10
    }

    /// Relative humidity in milli-percent (percent * 1000).
    pub fn milli_percent(&self) -> u32 {
        ((u64::from(self.0) * 1000) >> 10) as u32
    }

    /// Splits the value into whole percent and three decimal places.
    ///
    /// # Example
    /// ```rust
    /// use bm280_driver::Humidity;
    /// let hum = Humidity(56317);
    /// assert_eq!(hum.split(), (54, 997)); // Represents 54.997 %
    /// ```
    pub fn split(&self) -> (u32, u32) {
        let milli = self.milli_percent();
        (milli / 1000, milli % 1000)
    }
}

/// Compensated measurement result in physical units.
///
/// A channel that was skipped, is absent on this device, or hit a degenerate
/// compensation case is `None` (not measured).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Temperature data.
    pub temp: Option<Temperature>,
    /// Atmospheric pressure data.
    pub pres: Option<Pressure>,
    /// Humidity data.
    pub hum: Option<Humidity>,
}

impl Measurement {
    /// Which channels hold a valid value.
    pub fn status(&self) -> Status {
        Status {
            temperature: self.temp.is_some(),
            pressure: self.pres.is_some(),
            humidity: self.hum.is_some(),
        }
    }
}

/// Per-channel validity flags of a [`Measurement`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub temperature: bool,
    pub pressure: bool,
    pub humidity: bool,
}

impl Status {
    /// `true` if no channel was measured.
    pub fn is_empty(&self) -> bool {
        !(self.temperature || self.pressure || self.humidity)
    }
}

/// The main BM280 driver structure, one per physical unit.
///
/// Use `Bm280::new(...)` to start. The `STATE` generic uses the Typestate pattern
/// to track initialization status at compile time.
#[derive(Debug)]
pub struct Bm280<I2C, STATE> {
    i2c: I2C,
    address: Address,
    variant: Variant,
    pub(crate) calib_data: CalibData,
    /// Configuration last written by `apply`; `None` until then.
    config: Option<Config>,
    last: Option<Measurement>,
    _state: PhantomData<STATE>,
}

impl<I2C, E> Bm280<I2C, Uninitialized>
where
    I2C: i2c::I2c<Error = E>,
    E: i2c::Error,
{
    /// Creates a new driver instance in the `Uninitialized` state.
    ///
    /// This does not communicate with the sensor yet.
    pub fn new(i2c: I2C, address: Address) -> Self {
        Bm280 {
            i2c,
            address,
            // Replaced by the chip id during `init`.
            variant: Variant::Bme280,
            calib_data: CalibData::default(),
            config: None,
            last: None,
            _state: PhantomData,
        }
    }

    /// Identifies the part, performs a soft-reset and loads factory calibration data.
    ///
    /// This transitions the driver state from `Uninitialized` to `Ready`.
    ///
    /// # Errors
    /// `DeviceNotFound` if the address is not acknowledged, `UnknownChipId` for a
    /// foreign device, `BusError` for any other I2C failure.
    pub fn init(mut self, delay: &mut impl DelayNs) -> error::Result<Bm280<I2C, Ready>, E> {
        // Sensor requires time to start up before it accepts commands
        delay.delay_ms(2);

        let id = self.chip_id()?;
        let variant = Variant::from_chip_id(id).ok_or(error::Bm280Error::UnknownChipId(id))?;

        self.soft_reset(delay)?;

        let calib_data = calibration::load(&mut self.i2c, self.address, variant)?;
        debug!("{:#x}: initialized, chip id {:#x}", u8::from(self.address), id);

        Ok(Bm280 {
            i2c: self.i2c,
            address: self.address,
            variant,
            calib_data,
            config: None,
            last: None,
            _state: PhantomData,
        })
    }
}

impl<I2C, STATE, E> Bm280<I2C, STATE>
where
    I2C: i2c::I2c<Error = E>,
    E: i2c::Error,
{
    /// Reads the chip id (0x60 for the BME280, 0x58 for the BMP280).
    pub fn chip_id(&mut self) -> error::Result<u8, E> {
        self.read_reg_byte(regs::CHIP_ID)
    }

    /// The bus address of this unit.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Destroys the driver and hands back the I2C bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Resets all registers to their power-on values.
    ///
    /// A delay of at least 2ms is required after the reset command.
    fn soft_reset(&mut self, delay: &mut impl DelayNs) -> error::Result<(), E> {
        self.write_reg(&[regs::RESET, regs::RESET_CMD])?;
        delay.delay_ms(2);
        Ok(())
    }

    /// Reads data from a starting register address into a provided buffer.
    fn read_into(&mut self, reg_address: u8, buffer: &mut [u8]) -> error::Result<(), E> {
        self.i2c
            .write_read(self.address.into(), &[reg_address], buffer)
            .map_err(error::Bm280Error::from_bus)
    }

    /// Reads a single byte from a specific register address.
    fn read_reg_byte(&mut self, reg_address: u8) -> error::Result<u8, E> {
        let mut buffer = [0];
        self.read_into(reg_address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Writes a byte slice (typically `[Register, Value]`) to the sensor.
    fn write_reg(&mut self, data: &[u8]) -> error::Result<(), E> {
        self.i2c
            .write(self.address.into(), data)
            .map_err(error::Bm280Error::from_bus)
    }
}

impl<I2C, E> Bm280<I2C, Ready>
where
    I2C: i2c::I2c<Error = E>,
    E: i2c::Error,
{
    /// The device variant detected during `init`.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// The factory calibration loaded during `init`.
    pub fn calibration(&self) -> &CalibData {
        &self.calib_data
    }

    /// The configuration last applied, if any.
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// The result of the last successful [`read_data`](Self::read_data).
    pub fn last_measurement(&self) -> Option<Measurement> {
        self.last
    }

    /// Soft-resets the sensor. Calibration is kept, the configuration must be
    /// applied again.
    pub fn reset(&mut self, delay: &mut impl DelayNs) -> error::Result<(), E> {
        self.config = None;
        self.last = None;
        self.soft_reset(delay)
    }

    /// Writes a full sensor configuration.
    ///
    /// Writes `ctrl_hum` (0xF2), `config` (0xF5) and `ctrl_meas` (0xF4) in
    /// this order; `ctrl_hum` only takes effect after `ctrl_meas` is written.
    /// Reserved bits are read back and preserved. A unit running in normal
    /// mode is put to sleep first, since `config` writes are ignored while it
    /// is cycling.
    ///
    /// # Errors
    /// `UnsupportedFeature` if humidity is requested on a part without a
    /// humidity sensor; nothing is sent to the device in that case.
    pub fn apply(&mut self, config: &Config) -> error::Result<(), E> {
        if !config.osrs_config.hum_osrs.is_skipped() && !self.variant.has_humidity() {
            return Err(error::Bm280Error::UnsupportedFeature);
        }

        // From here on the device state no longer matches the old configuration.
        self.config = None;

        let mut ctrl = [0u8; regs::CTRL_BLOCK_SIZE];
        self.read_into(regs::CTRL_HUM, &mut ctrl)?;
        let [ctrl_hum, _status, ctrl_meas, config_reg] = ctrl;

        if ctrl_meas & regs::MODE_MASK != PowerMode::Sleep as u8 {
            self.write_reg(&[regs::CTRL_MEAS, ctrl_meas & !regs::MODE_MASK])?;
        }

        if self.variant.has_humidity() {
            self.write_reg(&[regs::CTRL_HUM, config.ctrl_hum(ctrl_hum)])?;
        }
        self.write_reg(&[regs::CONFIG, config.config_reg(config_reg)])?;
        self.write_reg(&[regs::CTRL_MEAS, config.ctrl_meas(config.resting_mode())])?;

        self.config = Some(*config);
        Ok(())
    }

    /// Starts a measurement cycle and returns how long it will take.
    ///
    /// In forced (and sleep) mode this writes the forced-mode bits to start one
    /// conversion. In normal mode the device free-runs and nothing is written.
    pub fn trigger(&mut self) -> error::Result<Deadline, E> {
        let config = self.config.ok_or(error::Bm280Error::NotInitialized)?;

        if config.mode != PowerMode::Normal {
            self.write_reg(&[regs::CTRL_MEAS, config.ctrl_meas(PowerMode::Forced)])?;
        }

        let deadline = Deadline::for_config(&config);
        trace!(
            "{:#x}: triggered, wait {} us",
            u8::from(self.address),
            deadline.wait().0
        );
        Ok(deadline)
    }

    /// Waits out `deadline`, then polls the status register until the
    /// conversion and NVM copy are done.
    ///
    /// Polling is bounded by the deadline's grace period, which in normal mode
    /// spans a whole conversion plus standby cycle. On `Timeout` the
    /// handle stays configured and a fresh [`trigger`](Self::trigger) may be issued.
    pub fn wait_ready(&mut self, deadline: Deadline, delay: &mut impl DelayNs) -> error::Result<(), E> {
        delay.delay_us(deadline.wait.0);

        let mut budget_us = deadline.grace.0;
        loop {
            let status = self.read_reg_byte(regs::STATUS)?;
            if status & (regs::STATUS_MEASURING | regs::STATUS_IM_UPDATE) == 0 {
                return Ok(());
            }

            if budget_us == 0 {
                warn!("{:#x}: measurement timed out", u8::from(self.address));
                return Err(error::Bm280Error::Timeout);
            }

            let step = budget_us.min(deadline.poll.0);
            delay.delay_us(step);
            budget_us -= step;
        }
    }

    /// Burst-reads the ADC output registers.
    ///
    /// Reads `press`, `temp` and, on the BME280, `hum` in one transaction
    /// starting at 0xF7.
    pub fn read_raw(&mut self) -> error::Result<RawData, E> {
        let mut buffer = [0u8; raw_data_mem::SIZE_TPH];
        let len = if self.variant.has_humidity() {
            raw_data_mem::SIZE_TPH
        } else {
            raw_data_mem::SIZE_TP
        };
        self.read_into(raw_data_mem::ADDR, &mut buffer[..len])?;

        // Reconstruct 20-bit and 16-bit ADC values from register bytes
        let press_adc = (u32::from(buffer[0]) << 12)
            | (u32::from(buffer[1]) << 4)
            | (u32::from(buffer[2]) >> 4);
        let temp_adc = (u32::from(buffer[3]) << 12)
            | (u32::from(buffer[4]) << 4)
            | (u32::from(buffer[5]) >> 4);
        let hum_adc = self
            .variant
            .has_humidity()
            .then(|| u16::from_be_bytes([buffer[6], buffer[7]]));

        Ok(RawData {
            temp_adc,
            press_adc,
            hum_adc,
        })
    }

    /// Runs one measurement cycle and returns compensated data.
    ///
    /// Trigger, wait, burst read and compensation in one call. If every channel
    /// is skipped this returns an all-`None` measurement without touching the
    /// bus. A failed call leaves the handle unchanged, so it can simply be
    /// retried.
    pub fn read_data(&mut self, delay: &mut impl DelayNs) -> error::Result<Measurement, E> {
        let config = self.config.ok_or(error::Bm280Error::NotInitialized)?;

        let measurement = if config.osrs_config.is_all_skipped() {
            Measurement::default()
        } else {
            let deadline = self.trigger()?;
            self.wait_ready(deadline, delay)?;
            let raw = self.read_raw()?;
            compensate(&raw, &self.calib_data)
        };

        self.last = Some(measurement);
        Ok(measurement)
    }
}
