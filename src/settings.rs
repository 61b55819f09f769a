use core::fmt;

/// Wird zurückgegeben, wenn ein Zahlenwert keiner gültigen Einstellung entspricht.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidConfig;

impl fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("value is not a legal configuration setting")
    }
}

impl core::error::Error for InvalidConfig {}

/// Einstellungen für das Oversampling von Temperatur, Druck und Feuchtigkeit.
///
/// Höhere Oversampling-Raten reduzieren das Rauschen durch Mittelwertbildung in der Hardware,
/// verlängern jedoch die Messdauer und erhöhen den Stromverbrauch pro Messzyklus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Oversampling {
    /// Keine Messung. Das Ausgaberegister des Kanals behält seinen Skip-Wert.
    Skipped = 0b000,
    /// 1-faches Oversampling (Standard).
    #[default]
    X1 = 0b001,
    /// 2-faches Oversampling.
    X2 = 0b010,
    /// 4-faches Oversampling.
    X4 = 0b011,
    /// 8-faches Oversampling.
    X8 = 0b100,
    /// 16-faches Oversampling. Maximale Präzision, längste Dauer.
    X16 = 0b101,
}

impl Oversampling {
    /// Anzahl der gemittelten Samples pro Messung (0 bei `Skipped`).
    pub const fn factor(self) -> u32 {
        match self {
            Oversampling::Skipped => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 4,
            Oversampling::X8 => 8,
            Oversampling::X16 => 16,
        }
    }

    /// Wählt die Einstellung über die Sample-Anzahl, z.B. `16` für [`Oversampling::X16`].
    pub fn from_factor(factor: u8) -> Result<Self, InvalidConfig> {
        match factor {
            0 => Ok(Oversampling::Skipped),
            1 => Ok(Oversampling::X1),
            2 => Ok(Oversampling::X2),
            4 => Ok(Oversampling::X4),
            8 => Ok(Oversampling::X8),
            16 => Ok(Oversampling::X16),
            _ => Err(InvalidConfig),
        }
    }

    /// Gibt `true` zurück, wenn der Kanal nicht gemessen wird.
    pub fn is_skipped(self) -> bool {
        self == Oversampling::Skipped
    }
}

/// Parst einen 3-Bit `osrs_x` Registerwert.
impl TryFrom<u8> for Oversampling {
    type Error = InvalidConfig;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b000 => Ok(Oversampling::Skipped),
            0b001 => Ok(Oversampling::X1),
            0b010 => Ok(Oversampling::X2),
            0b011 => Ok(Oversampling::X4),
            0b100 => Ok(Oversampling::X8),
            0b101 => Ok(Oversampling::X16),
            _ => Err(InvalidConfig),
        }
    }
}

/// Gruppierte Oversampling-Konfiguration für alle drei Umwelt-Kanäle.
///
/// Nutzen Sie `Oversampling::Skipped`, um Kanäle zu deaktivieren, die für Ihre
/// Anwendung nicht relevant sind (verkürzt jeden Messzyklus).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OversamplingConfig {
    /// Oversampling für den Temperatursensor.
    pub temp_osrs: Oversampling,
    /// Oversampling für den Luftfeuchtigkeitssensor. Muss beim BMP280 `Skipped` sein.
    pub hum_osrs: Oversampling,
    /// Oversampling für den Luftdrucksensor.
    pub pres_osrs: Oversampling,
}

impl OversamplingConfig {
    /// Gibt `true` zurück, wenn alle TPH-Kanäle auf `Skipped` stehen.
    pub fn is_all_skipped(&self) -> bool {
        self.temp_osrs.is_skipped() && self.hum_osrs.is_skipped() && self.pres_osrs.is_skipped()
    }
}

/// Koeffizient für den IIR (Infinite Impulse Response) Filter.
///
/// Glättet kurzfristige Störungen bei Druck und Temperatur (z.B. eine zugeschlagene
/// Tür oder ein Windstoß). Die Luftfeuchtigkeit wird nicht gefiltert.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IIRFilter {
    /// Filter deaktiviert.
    #[default]
    Off = 0b000,
    X2 = 0b001,
    X4 = 0b010,
    X8 = 0b011,
    X16 = 0b100,
}

impl IIRFilter {
    /// Wählt den Filter über seinen Koeffizienten; `0` und `1` schalten ihn ab.
    pub fn from_coefficient(coefficient: u8) -> Result<Self, InvalidConfig> {
        match coefficient {
            0 | 1 => Ok(IIRFilter::Off),
            2 => Ok(IIRFilter::X2),
            4 => Ok(IIRFilter::X4),
            8 => Ok(IIRFilter::X8),
            16 => Ok(IIRFilter::X16),
            _ => Err(InvalidConfig),
        }
    }
}

impl TryFrom<u8> for IIRFilter {
    type Error = InvalidConfig;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b000 => Ok(IIRFilter::Off),
            0b001 => Ok(IIRFilter::X2),
            0b010 => Ok(IIRFilter::X4),
            0b011 => Ok(IIRFilter::X8),
            0b100 => Ok(IIRFilter::X16),
            _ => Err(InvalidConfig),
        }
    }
}

/// Betriebsmodus, Bits `[1:0]` von `ctrl_meas`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerMode {
    /// Keine Wandlungen. Messungen nur auf Anforderung.
    Sleep = 0b00,
    /// Eine Wandlung pro Trigger, danach kehrt der Sensor in den Sleep-Modus zurück.
    #[default]
    Forced = 0b01,
    /// Fortlaufende Wandlungen, getrennt durch das Standby-Intervall.
    Normal = 0b11,
}

impl TryFrom<u8> for PowerMode {
    type Error = InvalidConfig;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b00 => Ok(PowerMode::Sleep),
            // 01 und 10 wählen beide den Forced-Modus.
            0b01 | 0b10 => Ok(PowerMode::Forced),
            0b11 => Ok(PowerMode::Normal),
            _ => Err(InvalidConfig),
        }
    }
}

/// Ruhezeit zwischen zwei Wandlungen im Normal-Modus (`t_sb`).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Standby {
    #[default]
    Ms0_5 = 0b000,
    Ms62_5 = 0b001,
    Ms125 = 0b010,
    Ms250 = 0b011,
    Ms500 = 0b100,
    Ms1000 = 0b101,
    Ms10 = 0b110,
    Ms20 = 0b111,
}

impl Standby {
    /// Standby-Dauer in Mikrosekunden.
    pub const fn micros(self) -> u32 {
        match self {
            Standby::Ms0_5 => 500,
            Standby::Ms62_5 => 62_500,
            Standby::Ms125 => 125_000,
            Standby::Ms250 => 250_000,
            Standby::Ms500 => 500_000,
            Standby::Ms1000 => 1_000_000,
            Standby::Ms10 => 10_000,
            Standby::Ms20 => 20_000,
        }
    }
}

impl TryFrom<u8> for Standby {
    type Error = InvalidConfig;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b000 => Ok(Standby::Ms0_5),
            0b001 => Ok(Standby::Ms62_5),
            0b010 => Ok(Standby::Ms125),
            0b011 => Ok(Standby::Ms250),
            0b100 => Ok(Standby::Ms500),
            0b101 => Ok(Standby::Ms1000),
            0b110 => Ok(Standby::Ms10),
            0b111 => Ok(Standby::Ms20),
            _ => Err(InvalidConfig),
        }
    }
}

/// Vollständige Konfiguration eines BM280.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Oversampling-Einstellungen für T, P und H.
    pub osrs_config: OversamplingConfig,
    /// IIR-Filter zur Rauschunterdrückung.
    pub iir_filter: IIRFilter,
    /// Wie Wandlungen gestartet werden.
    pub mode: PowerMode,
    /// Pause zwischen Wandlungen. Nur im [`PowerMode::Normal`] relevant.
    pub standby: Standby,
}

// ctrl_hum[7:3] und config[1:0] dürfen nicht verändert werden.
const CTRL_HUM_KEEP_MASK: u8 = 0xF8;
const CONFIG_KEEP_MASK: u8 = 0x03;

impl Config {
    /// Dauerhafte Innenraumüberwachung: T x2, P x16, H x1, Filter x16, Normal-Modus.
    pub fn indoor(standby: Standby) -> Self {
        Self {
            osrs_config: OversamplingConfig {
                temp_osrs: Oversampling::X2,
                hum_osrs: Oversampling::X1,
                pres_osrs: Oversampling::X16,
            },
            iir_filter: IIRFilter::X16,
            mode: PowerMode::Normal,
            standby,
        }
    }

    /// Wetterüberwachung: einzelne Forced-Messungen, überall x1, kein Filter.
    pub fn weather() -> Self {
        Self {
            osrs_config: OversamplingConfig::default(),
            iir_filter: IIRFilter::Off,
            mode: PowerMode::Forced,
            standby: Standby::Ms0_5,
        }
    }

    /// Wert für `ctrl_hum` (0xF2); die reservierten oberen Bits von `current` bleiben erhalten.
    pub(crate) fn ctrl_hum(&self, current: u8) -> u8 {
        (current & CTRL_HUM_KEEP_MASK) | (self.osrs_config.hum_osrs as u8)
    }

    /// Wert für `ctrl_meas` (0xF4) mit den angegebenen Modus-Bits.
    pub(crate) fn ctrl_meas(&self, mode: PowerMode) -> u8 {
        ((self.osrs_config.temp_osrs as u8) << 5)
            | ((self.osrs_config.pres_osrs as u8) << 2)
            | (mode as u8)
    }

    /// Wert für `config` (0xF5); `spi3w_en` und das reservierte Bit von `current` bleiben erhalten.
    pub(crate) fn config_reg(&self, current: u8) -> u8 {
        ((self.standby as u8) << 5) | ((self.iir_filter as u8) << 2) | (current & CONFIG_KEEP_MASK)
    }

    /// Modus-Bits, die `apply` schreibt.
    ///
    /// Der Forced-Modus wird nur durch einen Trigger aktiviert; das Konfigurieren
    /// startet also nie selbst eine Wandlung.
    pub(crate) fn resting_mode(&self) -> PowerMode {
        match self.mode {
            PowerMode::Normal => PowerMode::Normal,
            PowerMode::Sleep | PowerMode::Forced => PowerMode::Sleep,
        }
    }
}

/// Fluent Builder für eine [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Startet mit der Standard-Konfiguration (x1 überall, Forced-Modus).
    pub fn new() -> Self {
        Self::default()
    }

    /// Setzt das Oversampling für die Temperatur.
    pub fn temp_oversampling(mut self, os: Oversampling) -> Self {
        self.config.osrs_config.temp_osrs = os;
        self
    }

    /// Setzt das Oversampling für die Luftfeuchtigkeit.
    pub fn hum_oversampling(mut self, os: Oversampling) -> Self {
        self.config.osrs_config.hum_osrs = os;
        self
    }

    /// Setzt das Oversampling für den Luftdruck.
    pub fn pres_oversampling(mut self, os: Oversampling) -> Self {
        self.config.osrs_config.pres_osrs = os;
        self
    }

    /// Setzt den IIR-Filter Koeffizienten.
    pub fn iir_filter(mut self, filter: IIRFilter) -> Self {
        self.config.iir_filter = filter;
        self
    }

    /// Setzt den Betriebsmodus.
    pub fn mode(mut self, mode: PowerMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Setzt die Standby-Zeit für den Normal-Modus.
    pub fn standby(mut self, standby: Standby) -> Self {
        self.config.standby = standby;
        self
    }

    /// Schließt den Builder ab.
    pub fn build(self) -> Config {
        self.config
    }
}
