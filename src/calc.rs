//! Kompensation der rohen ADC-Werte in physikalische Einheiten.
//!
//! Ganzzahl-Formeln von Bosch aus dem BME280 Datenblatt (Abschnitt 4.2.3):
//! 32-Bit für Temperatur und Feuchtigkeit, 64-Bit für den Druck.
//! Alle Zwischenwerte werden explizit als `i64` mit den Original-Shifts berechnet,
//! die Ergebnisse sind also bitgleich, solange die Referenz selbst nicht überläuft.

use crate::{CalcTempData, CalibData, Humidity, Measurement, Pressure, RawData, Temperature};

/// Ausgabe eines 20-Bit Kanals mit Oversampling `Skipped`.
pub const ADC_SKIPPED_20: u32 = 0x8_0000;
/// Ausgabe des Feuchtigkeitskanals mit Oversampling `Skipped`.
pub const ADC_SKIPPED_16: u16 = 0x8000;

/// Obergrenze des Feuchtigkeits-Akkumulators: 100 %RH in Q22.10, um 12 nach links geschoben.
const HUM_ACC_MAX: i64 = 419_430_400;

/// Rechnet eine Rohmessung in physikalische Einheiten um.
///
/// Rein und deterministisch. Die Temperatur wird zuerst berechnet, da `t_fine`
/// für Druck und Luftfeuchtigkeit zwingend erforderlich ist; ohne Temperatur
/// kann nichts weiter kompensiert werden.
pub fn compensate(raw: &RawData, calib: &CalibData) -> Measurement {
    let Some(temp) = calib.compensate_temperature(raw.temp_adc) else {
        return Measurement::default();
    };

    Measurement {
        temp: Some(temp.temp),
        pres: calib.compensate_pressure(temp.t_fine, raw.press_adc),
        hum: raw
            .hum_adc
            .and_then(|hum_adc| calib.compensate_humidity(temp.t_fine, hum_adc)),
    }
}

impl CalibData {
    /// Rechnet den rohen Temperatur-ADC-Wert in Centi-Grad Celsius um.
    ///
    /// Liefert außerdem `t_fine`, die Referenz für die Druck- und
    /// Feuchtigkeitsformeln. Gibt `None` für den Skip-Wert zurück.
    pub fn compensate_temperature(&self, temp_adc: u32) -> Option<CalcTempData> {
        if temp_adc == ADC_SKIPPED_20 {
            return None;
        }

        let adc = i64::from(temp_adc);
        let t1 = i64::from(self.dig_t1);

        let var1 = (((adc >> 3) - (t1 << 1)) * i64::from(self.dig_t2)) >> 11;
        let var2 = (((((adc >> 4) - t1) * ((adc >> 4) - t1)) >> 12) * i64::from(self.dig_t3)) >> 14;
        let t_fine = (var1 + var2) as i32;

        Some(CalcTempData {
            t_fine,
            temp: Temperature(((i64::from(t_fine) * 5 + 128) >> 8) as i32),
        })
    }

    /// Rechnet den rohen Druck-ADC-Wert in Pascal (Q24.8) um.
    ///
    /// Gibt `None` für den Skip-Wert zurück, ebenso wenn der Divisor null ist
    /// oder das Ergebnis den darstellbaren Bereich verlässt.
    pub fn compensate_pressure(&self, t_fine: i32, press_adc: u32) -> Option<Pressure> {
        if press_adc == ADC_SKIPPED_20 {
            return None;
        }

        let mut var1 = i64::from(t_fine) - 128_000;
        let mut var2 = var1.wrapping_mul(var1).wrapping_mul(i64::from(self.dig_p6));
        var2 = var2.wrapping_add(var1.wrapping_mul(i64::from(self.dig_p5)) << 17);
        var2 = var2.wrapping_add(i64::from(self.dig_p4) << 35);
        var1 = (var1.wrapping_mul(var1).wrapping_mul(i64::from(self.dig_p3)) >> 8)
            .wrapping_add(var1.wrapping_mul(i64::from(self.dig_p2)) << 12);
        var1 = ((1i64 << 47).wrapping_add(var1)).wrapping_mul(i64::from(self.dig_p1)) >> 33;

        if var1 == 0 {
            warn!("pressure compensation divisor is zero");
            return None;
        }

        let mut p = 1_048_576 - i64::from(press_adc);
        p = ((p << 31).wrapping_sub(var2))
            .wrapping_mul(3125)
            .wrapping_div(var1);
        var1 = i64::from(self.dig_p9).wrapping_mul(p >> 13).wrapping_mul(p >> 13) >> 25;
        var2 = i64::from(self.dig_p8).wrapping_mul(p) >> 19;
        p = (p.wrapping_add(var1).wrapping_add(var2) >> 8) + (i64::from(self.dig_p7) << 4);

        u32::try_from(p).ok().map(Pressure)
    }

    /// Rechnet den rohen Feuchtigkeits-ADC-Wert in relative Luftfeuchtigkeit (Q22.10) um.
    ///
    /// Das Ergebnis wird auf 0..=100 %RH begrenzt, da das Polynom an den Rändern
    /// leicht überschwingt. Gibt `None` für den Skip-Wert zurück.
    pub fn compensate_humidity(&self, t_fine: i32, hum_adc: u16) -> Option<Humidity> {
        if hum_adc == ADC_SKIPPED_16 {
            return None;
        }

        let v = i64::from(t_fine) - 76_800;

        let x = ((i64::from(hum_adc) << 14)
            - (i64::from(self.dig_h4) << 20)
            - i64::from(self.dig_h5).wrapping_mul(v)
            + 16_384)
            >> 15;
        let h6_term = v.wrapping_mul(i64::from(self.dig_h6)) >> 10;
        let h3_term = (v.wrapping_mul(i64::from(self.dig_h3)) >> 11) + 32_768;
        let y = (((h6_term.wrapping_mul(h3_term) >> 10) + 2_097_152)
            .wrapping_mul(i64::from(self.dig_h2))
            .wrapping_add(8_192))
            >> 14;

        let mut acc = x.wrapping_mul(y);
        acc = acc.wrapping_sub(
            (((acc >> 15).wrapping_mul(acc >> 15) >> 7).wrapping_mul(i64::from(self.dig_h1))) >> 4,
        );
        let acc = acc.clamp(0, HUM_ACC_MAX);

        Some(Humidity((acc >> 12) as u32))
    }
}
