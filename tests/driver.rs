use std::{cell::Cell, rc::Rc};

use bm280_driver::{
    compensate, error::Bm280Error, measurement_time, Address, Bm280, Config, ConfigBuilder,
    Humidity, IIRFilter, InvalidConfig, Measurement, Oversampling, PowerMode, Pressure, Ready,
    Standby, Temperature, Variant,
};
use embedded_hal::{
    delay::DelayNs,
    i2c::{self, ErrorKind, NoAcknowledgeSource, Operation},
};
use embedded_hal_mock::eh1::{
    delay::NoopDelay,
    i2c::{Mock as I2cMock, Transaction as I2cTransaction},
};

const TP_BLOCK: [u8; 26] = [
    0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C,
    0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17, 0x00, 0x4B,
];
const HUM_BLOCK: [u8; 7] = [0x6A, 0x01, 0x00, 0x13, 0x29, 0x03, 0x1E];

/// press = 415148, temp = 519888, hum = 30000
const DATASHEET_SAMPLE: [u8; 8] = [0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00, 0x75, 0x30];

const DATASHEET_RESULT: Measurement = Measurement {
    temp: Some(Temperature(2508)),
    pres: Some(Pressure(25_767_233)),
    hum: Some(Humidity(56_317)),
};

fn init_transactions(addr: u8, chip_id: u8) -> Vec<I2cTransaction> {
    let mut t = vec![
        I2cTransaction::write_read(addr, vec![0xD0], vec![chip_id]),
        I2cTransaction::write(addr, vec![0xE0, 0xB6]),
        I2cTransaction::write_read(addr, vec![0x88], TP_BLOCK.to_vec()),
    ];
    if chip_id == 0x60 {
        t.push(I2cTransaction::write_read(addr, vec![0xE1], HUM_BLOCK.to_vec()));
    }
    t
}

/// `Config::weather()` on a freshly reset BME280.
fn apply_weather_transactions(addr: u8) -> Vec<I2cTransaction> {
    vec![
        I2cTransaction::write_read(addr, vec![0xF2], vec![0x00; 4]),
        I2cTransaction::write(addr, vec![0xF2, 0x01]),
        I2cTransaction::write(addr, vec![0xF5, 0x00]),
        I2cTransaction::write(addr, vec![0xF4, 0x24]),
    ]
}

fn forced_cycle_transactions(addr: u8, ctrl_meas: u8, data: &[u8]) -> Vec<I2cTransaction> {
    vec![
        I2cTransaction::write(addr, vec![0xF4, ctrl_meas]),
        I2cTransaction::write_read(addr, vec![0xF3], vec![0x00]),
        I2cTransaction::write_read(addr, vec![0xF7], data.to_vec()),
    ]
}

fn concat(parts: &[Vec<I2cTransaction>]) -> Vec<I2cTransaction> {
    parts.concat()
}

fn ready_sensor(i2c: &I2cMock, address: Address) -> Bm280<I2cMock, Ready> {
    Bm280::new(i2c.clone(), address)
        .init(&mut NoopDelay::new())
        .unwrap()
}

#[test]
fn init_identifies_bme280_and_loads_calibration() {
    let mut i2c = I2cMock::new(&init_transactions(0x76, 0x60));

    let sensor = ready_sensor(&i2c, Address::SdoGnd);
    assert_eq!(sensor.variant(), Variant::Bme280);
    assert_eq!(sensor.address(), Address::SdoGnd);
    assert_eq!(sensor.calibration().dig_t1, 27504);
    assert_eq!(sensor.calibration().dig_h2, 362);
    assert_eq!(sensor.config(), None);
    assert_eq!(sensor.last_measurement(), None);

    i2c.done();
}

#[test]
fn forced_read_reproduces_datasheet_example() {
    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        apply_weather_transactions(0x76),
        forced_cycle_transactions(0x76, 0x25, &DATASHEET_SAMPLE),
    ]));
    let mut delay = NoopDelay::new();

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    sensor.apply(&Config::weather()).unwrap();
    let data = sensor.read_data(&mut delay).unwrap();

    assert_eq!(data, DATASHEET_RESULT);
    assert_eq!(data.temp.unwrap().split(), (25, 8));
    assert_eq!(data.pres.unwrap().pascal(), 100_653);
    assert_eq!(data.hum.unwrap().split(), (54, 997));
    assert_eq!(sensor.last_measurement(), Some(data));

    i2c.done();
}

#[test]
fn pipeline_steps_can_be_driven_manually() {
    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        apply_weather_transactions(0x76),
        forced_cycle_transactions(0x76, 0x25, &DATASHEET_SAMPLE),
    ]));
    let mut delay = NoopDelay::new();

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    sensor.apply(&Config::weather()).unwrap();

    let deadline = sensor.trigger().unwrap();
    assert_eq!(deadline.wait().0, 9_300);
    sensor.wait_ready(deadline, &mut delay).unwrap();
    let raw = sensor.read_raw().unwrap();

    assert_eq!(raw.temp_adc, 519_888);
    assert_eq!(raw.press_adc, 415_148);
    assert_eq!(raw.hum_adc, Some(30_000));
    assert_eq!(compensate(&raw, sensor.calibration()), DATASHEET_RESULT);
    // Only `read_data` fills the cache.
    assert_eq!(sensor.last_measurement(), None);

    i2c.done();
}

#[test]
fn normal_mode_polls_status_without_triggering() {
    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        vec![
            I2cTransaction::write_read(0x76, vec![0xF2], vec![0x00; 4]),
            I2cTransaction::write(0x76, vec![0xF2, 0x01]),
            I2cTransaction::write(0x76, vec![0xF5, 0xB0]),
            I2cTransaction::write(0x76, vec![0xF4, 0x57]),
            // measuring, then done
            I2cTransaction::write_read(0x76, vec![0xF3], vec![0x08]),
            I2cTransaction::write_read(0x76, vec![0xF3], vec![0x00]),
            I2cTransaction::write_read(0x76, vec![0xF7], DATASHEET_SAMPLE.to_vec()),
        ],
    ]));
    let mut delay = NoopDelay::new();

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    sensor.apply(&Config::indoor(Standby::Ms1000)).unwrap();
    assert_eq!(sensor.read_data(&mut delay).unwrap(), DATASHEET_RESULT);

    i2c.done();
}

#[test]
fn apply_stops_a_cycling_device_and_keeps_reserved_bits() {
    let config = ConfigBuilder::new()
        .temp_oversampling(Oversampling::X2)
        .pres_oversampling(Oversampling::X4)
        .hum_oversampling(Oversampling::X8)
        .iir_filter(IIRFilter::X4)
        .mode(PowerMode::Forced)
        .build();

    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x77, 0x60),
        vec![
            // ctrl_hum with reserved bits set, status, running in normal mode, spi3w_en set
            I2cTransaction::write_read(0x77, vec![0xF2], vec![0xA8, 0x00, 0x57, 0xB1]),
            I2cTransaction::write(0x77, vec![0xF4, 0x54]),
            I2cTransaction::write(0x77, vec![0xF2, 0xAC]),
            I2cTransaction::write(0x77, vec![0xF5, 0x09]),
            I2cTransaction::write(0x77, vec![0xF4, 0x4C]),
        ],
    ]));

    let mut sensor = ready_sensor(&i2c, Address::SdoVddio);
    sensor.apply(&config).unwrap();
    assert_eq!(sensor.config(), Some(&config));

    i2c.done();
}

#[test]
fn all_skipped_reads_nothing_and_touches_no_bus() {
    let config = ConfigBuilder::new()
        .temp_oversampling(Oversampling::Skipped)
        .pres_oversampling(Oversampling::Skipped)
        .hum_oversampling(Oversampling::Skipped)
        .build();

    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        vec![
            I2cTransaction::write_read(0x76, vec![0xF2], vec![0x00; 4]),
            I2cTransaction::write(0x76, vec![0xF2, 0x00]),
            I2cTransaction::write(0x76, vec![0xF5, 0x00]),
            I2cTransaction::write(0x76, vec![0xF4, 0x00]),
        ],
    ]));

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    sensor.apply(&config).unwrap();

    let data = sensor.read_data(&mut NoopDelay::new()).unwrap();
    assert_eq!(data, Measurement::default());
    assert!(data.status().is_empty());

    i2c.done();
}

#[test]
fn skipped_channel_reads_back_as_not_measured() {
    let config = ConfigBuilder::new()
        .pres_oversampling(Oversampling::Skipped)
        .build();
    // pressure registers hold the skip value
    let sample = [0x80, 0x00, 0x00, 0x7E, 0xED, 0x00, 0x75, 0x30];

    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        vec![
            I2cTransaction::write_read(0x76, vec![0xF2], vec![0x00; 4]),
            I2cTransaction::write(0x76, vec![0xF2, 0x01]),
            I2cTransaction::write(0x76, vec![0xF5, 0x00]),
            I2cTransaction::write(0x76, vec![0xF4, 0x20]),
        ],
        forced_cycle_transactions(0x76, 0x21, &sample),
    ]));

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    sensor.apply(&config).unwrap();
    let data = sensor.read_data(&mut NoopDelay::new()).unwrap();

    assert_eq!(data.temp, Some(Temperature(2508)));
    assert_eq!(data.pres, None);
    assert_eq!(data.hum, Some(Humidity(56_317)));
    assert!(!data.status().pressure);

    i2c.done();
}

#[test]
fn bmp280_rejects_humidity_without_bus_traffic() {
    let config = ConfigBuilder::new()
        .hum_oversampling(Oversampling::Skipped)
        .build();

    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x77, 0x58),
        vec![
            // no ctrl_hum write on a part without humidity
            I2cTransaction::write_read(0x77, vec![0xF2], vec![0x00; 4]),
            I2cTransaction::write(0x77, vec![0xF5, 0x00]),
            I2cTransaction::write(0x77, vec![0xF4, 0x24]),
        ],
        forced_cycle_transactions(0x77, 0x25, &DATASHEET_SAMPLE[..6]),
    ]));

    let mut sensor = ready_sensor(&i2c, Address::SdoVddio);
    assert_eq!(sensor.variant(), Variant::Bmp280);

    assert_eq!(
        sensor.apply(&Config::weather()),
        Err(Bm280Error::UnsupportedFeature)
    );
    assert_eq!(sensor.config(), None);

    sensor.apply(&config).unwrap();
    let data = sensor.read_data(&mut NoopDelay::new()).unwrap();
    assert_eq!(data.temp, Some(Temperature(2508)));
    assert_eq!(data.pres, Some(Pressure(25_767_233)));
    assert_eq!(data.hum, None);

    i2c.done();
}

fn apply_codes(
    sensor: &mut Bm280<I2cMock, Ready>,
    osrs_t: u8,
    filter: u8,
) -> Result<(), Bm280Error<ErrorKind>> {
    let config = ConfigBuilder::new()
        .temp_oversampling(Oversampling::try_from(osrs_t)?)
        .iir_filter(IIRFilter::try_from(filter)?)
        .build();
    sensor.apply(&config)
}

#[test]
fn invalid_register_codes_are_rejected_before_any_write() {
    let mut i2c = I2cMock::new(&init_transactions(0x76, 0x60));

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    assert_eq!(apply_codes(&mut sensor, 0b110, 0), Err(Bm280Error::InvalidConfig));
    assert_eq!(apply_codes(&mut sensor, 0b001, 0b111), Err(Bm280Error::InvalidConfig));
    assert_eq!(Address::try_from(0x42), Err(InvalidConfig));
    assert_eq!(sensor.config(), None);

    i2c.done();
}

#[test]
fn measuring_without_configuration_fails_fast() {
    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        apply_weather_transactions(0x76),
        vec![I2cTransaction::write(0x76, vec![0xE0, 0xB6])],
    ]));
    let mut delay = NoopDelay::new();

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    assert_eq!(sensor.read_data(&mut delay), Err(Bm280Error::NotInitialized));
    assert_eq!(sensor.trigger(), Err(Bm280Error::NotInitialized));

    sensor.apply(&Config::weather()).unwrap();
    sensor.reset(&mut delay).unwrap();
    assert_eq!(sensor.config(), None);
    assert_eq!(sensor.read_data(&mut delay), Err(Bm280Error::NotInitialized));

    i2c.done();
}

#[test]
fn stuck_measuring_flag_times_out_and_handle_stays_usable() {
    // 5 ms grace at 500 us steps: one poll up front plus ten more
    let stuck: Vec<_> = (0..11)
        .map(|_| I2cTransaction::write_read(0x76, vec![0xF3], vec![0x08]))
        .collect();

    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        apply_weather_transactions(0x76),
        vec![I2cTransaction::write(0x76, vec![0xF4, 0x25])],
        stuck,
        forced_cycle_transactions(0x76, 0x25, &DATASHEET_SAMPLE),
    ]));
    let mut delay = NoopDelay::new();

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    sensor.apply(&Config::weather()).unwrap();

    assert_eq!(sensor.read_data(&mut delay), Err(Bm280Error::Timeout));
    assert_eq!(sensor.config(), Some(&Config::weather()));
    assert_eq!(sensor.last_measurement(), None);

    assert_eq!(sensor.read_data(&mut delay).unwrap(), DATASHEET_RESULT);

    i2c.done();
}

#[test]
fn bus_error_leaves_previous_reading_in_place() {
    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        apply_weather_transactions(0x76),
        forced_cycle_transactions(0x76, 0x25, &DATASHEET_SAMPLE),
        vec![
            I2cTransaction::write(0x76, vec![0xF4, 0x25]),
            I2cTransaction::write_read(0x76, vec![0xF3], vec![0x00]),
            I2cTransaction::write_read(0x76, vec![0xF7], vec![0x00; 8])
                .with_error(ErrorKind::Other),
        ],
    ]));
    let mut delay = NoopDelay::new();

    let mut sensor = ready_sensor(&i2c, Address::SdoGnd);
    sensor.apply(&Config::weather()).unwrap();
    let first = sensor.read_data(&mut delay).unwrap();

    let err = sensor.read_data(&mut delay).unwrap_err();
    assert!(matches!(err, Bm280Error::BusError(_)), "{err:?}");
    assert_eq!(sensor.last_measurement(), Some(first));
    assert_eq!(sensor.config(), Some(&Config::weather()));

    i2c.done();
}

#[test]
fn two_units_on_one_bus_keep_their_own_state() {
    let pres_skipped = ConfigBuilder::new()
        .pres_oversampling(Oversampling::Skipped)
        .hum_oversampling(Oversampling::Skipped)
        .build();
    let bmp_sample = [0x80, 0x00, 0x00, 0x7E, 0xED, 0x00];

    let mut i2c = I2cMock::new(&concat(&[
        init_transactions(0x76, 0x60),
        init_transactions(0x77, 0x58),
        apply_weather_transactions(0x76),
        vec![
            I2cTransaction::write_read(0x77, vec![0xF2], vec![0x00; 4]),
            I2cTransaction::write(0x77, vec![0xF5, 0x00]),
            I2cTransaction::write(0x77, vec![0xF4, 0x20]),
        ],
        forced_cycle_transactions(0x77, 0x21, &bmp_sample),
        forced_cycle_transactions(0x76, 0x25, &DATASHEET_SAMPLE),
    ]));
    let mut delay = NoopDelay::new();

    let mut bme = ready_sensor(&i2c, Address::SdoGnd);
    let mut bmp = ready_sensor(&i2c, Address::SdoVddio);
    bme.apply(&Config::weather()).unwrap();
    bmp.apply(&pres_skipped).unwrap();

    let from_bmp = bmp.read_data(&mut delay).unwrap();
    let from_bme = bme.read_data(&mut delay).unwrap();

    assert_eq!(from_bme, DATASHEET_RESULT);
    assert_eq!(
        from_bmp,
        Measurement {
            temp: Some(Temperature(2508)),
            pres: None,
            hum: None,
        }
    );
    assert_eq!(bme.calibration().dig_h1, 75);
    assert_eq!(bmp.calibration().dig_h1, 0);
    assert_eq!(bme.last_measurement(), Some(from_bme));
    assert_eq!(bmp.last_measurement(), Some(from_bmp));

    bmp.release();
    bme.release();
    i2c.done();
}

#[test]
fn foreign_chip_id_is_reported() {
    let mut i2c = I2cMock::new(&[I2cTransaction::write_read(0x76, vec![0xD0], vec![0x61])]);

    let result = Bm280::new(i2c.clone(), Address::SdoGnd).init(&mut NoopDelay::new());
    assert!(matches!(result, Err(Bm280Error::UnknownChipId(0x61))));

    i2c.done();
}

/// A bus with nothing attached: every transfer is NACKed at the address.
struct EmptyBus;

#[derive(Debug)]
struct AddressNack;

impl i2c::Error for AddressNack {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }
}

impl i2c::ErrorType for EmptyBus {
    type Error = AddressNack;
}

impl i2c::I2c for EmptyBus {
    fn transaction(&mut self, _address: u8, _operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        Err(AddressNack)
    }
}

#[test]
fn absent_device_is_not_found() {
    let result = Bm280::new(EmptyBus, Address::SdoGnd).init(&mut NoopDelay::new());
    assert!(matches!(result, Err(Bm280Error::DeviceNotFound)));

    let mut sensor = Bm280::new(EmptyBus, Address::SdoVddio);
    assert!(matches!(sensor.chip_id(), Err(Bm280Error::DeviceNotFound)));
}

/// Time spent on the wire per I2C transfer in the device model.
const TRANSFER_NS: u64 = 100_000;

/// A BME280 at 0x76 cycling in normal mode against a shared clock.
///
/// `measuring` is set for the whole conversion and clear only during standby.
struct FreeRunningBme280 {
    now_ns: Rc<Cell<u64>>,
    conversion_ns: u64,
    standby_ns: u64,
}

impl FreeRunningBme280 {
    fn status(&self) -> u8 {
        let phase = self.now_ns.get() % (self.conversion_ns + self.standby_ns);
        if phase < self.conversion_ns {
            0x08
        } else {
            0x00
        }
    }

    fn register(&self, reg: u8, offset: usize) -> u8 {
        match reg {
            0xD0 => 0x60,
            0x88 => TP_BLOCK[offset],
            0xE1 => HUM_BLOCK[offset],
            0xF3 => self.status(),
            0xF7 => DATASHEET_SAMPLE[offset],
            _ => 0x00,
        }
    }
}

impl i2c::ErrorType for FreeRunningBme280 {
    type Error = ErrorKind;
}

impl i2c::I2c for FreeRunningBme280 {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        self.now_ns.set(self.now_ns.get() + TRANSFER_NS);
        if address != 0x76 {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        let mut reg = 0;
        for op in operations {
            match op {
                Operation::Write(bytes) => reg = bytes[0],
                Operation::Read(buf) => {
                    for (offset, byte) in buf.iter_mut().enumerate() {
                        *byte = self.register(reg, offset);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Delay that advances the shared clock instead of sleeping.
struct ClockDelay(Rc<Cell<u64>>);

impl DelayNs for ClockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns));
    }
}

fn read_free_running(standby: Standby) {
    let config = Config::indoor(standby);
    let now_ns = Rc::new(Cell::new(0));
    let conversion_ns = u64::from(measurement_time(&config).0) * 1_000;
    let standby_ns = u64::from(standby.micros()) * 1_000;
    let cycle_ns = conversion_ns + standby_ns;

    let device = FreeRunningBme280 {
        now_ns: now_ns.clone(),
        conversion_ns,
        standby_ns,
    };
    let mut delay = ClockDelay(now_ns.clone());

    let mut sensor = Bm280::new(device, Address::SdoGnd)
        .init(&mut delay)
        .unwrap();
    sensor.apply(&config).unwrap();

    // start every read at a different point of the device cycle
    for step in 0..200u64 {
        now_ns.set(step * cycle_ns / 200);
        assert_eq!(
            sensor.read_data(&mut delay),
            Ok(DATASHEET_RESULT),
            "read started {} ns into the cycle",
            step * cycle_ns / 200
        );
    }
}

#[test]
fn normal_mode_catches_shortest_standby_window() {
    read_free_running(Standby::Ms0_5);
}

#[test]
fn normal_mode_catches_short_standby_window() {
    read_free_running(Standby::Ms10);
}
