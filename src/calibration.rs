//! Factory calibration ("trimming") coefficients.
//!
//! The coefficients live in two non-contiguous ROM blocks: `0x88..=0xA1` holds
//! the temperature and pressure words plus `dig_H1`, and `0xE1..=0xE7` holds
//! the remaining humidity coefficients. All words are little-endian.

use embedded_hal::i2c;

use crate::{error, Address, Variant};

/// Memory addresses and sizes for the calibration data registers.
mod calib_mem {
    pub const TP_ADDR: u8 = 0x88;
    pub const TP_SIZE: usize = 26;
    pub const HUM_ADDR: u8 = 0xE1;
    pub const HUM_SIZE: usize = 7;
}

/// Factory-fused calibration coefficients read from the sensor.
/// These are unique to every individual chip and required for compensation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibData {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
    pub dig_h1: u8,
    pub dig_h2: i16,
    pub dig_h3: u8,
    /// Signed 12-bit value.
    pub dig_h4: i16,
    /// Signed 12-bit value.
    pub dig_h5: i16,
    pub dig_h6: i8,
}

/// Reads the calibration ROM of the unit at `address`.
///
/// The humidity block is only read when `variant` has a humidity sensor; on
/// other parts the humidity coefficients stay zero.
///
/// # Errors
/// [`Bm280Error::DeviceNotFound`](error::Bm280Error::DeviceNotFound) if the
/// address is not acknowledged, [`Bm280Error::BusError`](error::Bm280Error::BusError)
/// for any other transfer failure.
pub fn load<I2C>(
    i2c: &mut I2C,
    address: Address,
    variant: Variant,
) -> error::Result<CalibData, I2C::Error>
where
    I2C: i2c::I2c,
{
    let mut tp = [0u8; calib_mem::TP_SIZE];
    i2c.write_read(address.into(), &[calib_mem::TP_ADDR], &mut tp)
        .map_err(error::Bm280Error::from_bus)?;

    let mut calib = decode_temp_press(&tp);

    if variant.has_humidity() {
        let mut hum = [0u8; calib_mem::HUM_SIZE];
        i2c.write_read(address.into(), &[calib_mem::HUM_ADDR], &mut hum)
            .map_err(error::Bm280Error::from_bus)?;
        decode_humidity(&mut calib, tp[25], &hum);
    }

    debug!("{:#x}: calibration loaded", u8::from(address));
    Ok(calib)
}

fn word(buf: &[u8], at: usize) -> [u8; 2] {
    [buf[at], buf[at + 1]]
}

fn decode_temp_press(buf: &[u8; calib_mem::TP_SIZE]) -> CalibData {
    CalibData {
        dig_t1: u16::from_le_bytes(word(buf, 0)),
        dig_t2: i16::from_le_bytes(word(buf, 2)),
        dig_t3: i16::from_le_bytes(word(buf, 4)),
        dig_p1: u16::from_le_bytes(word(buf, 6)),
        dig_p2: i16::from_le_bytes(word(buf, 8)),
        dig_p3: i16::from_le_bytes(word(buf, 10)),
        dig_p4: i16::from_le_bytes(word(buf, 12)),
        dig_p5: i16::from_le_bytes(word(buf, 14)),
        dig_p6: i16::from_le_bytes(word(buf, 16)),
        dig_p7: i16::from_le_bytes(word(buf, 18)),
        dig_p8: i16::from_le_bytes(word(buf, 20)),
        dig_p9: i16::from_le_bytes(word(buf, 22)),
        ..CalibData::default()
    }
}

fn decode_humidity(calib: &mut CalibData, h1: u8, buf: &[u8; calib_mem::HUM_SIZE]) {
    calib.dig_h1 = h1;
    calib.dig_h2 = i16::from_le_bytes(word(buf, 0));
    calib.dig_h3 = buf[2];
    // 0xE4 / 0xE6 carry the signed upper 8 bits, 0xE5 packs both low nibbles.
    calib.dig_h4 = ((buf[3] as i8 as i16) << 4) | (buf[4] & 0x0F) as i16;
    calib.dig_h5 = ((buf[5] as i8 as i16) << 4) | (buf[4] >> 4) as i16;
    calib.dig_h6 = buf[6] as i8;
}
