//! Thermistor reading to degrees Celsius.
//!
//! The divider is a 10 kΩ NTC against a 10 kΩ resistor on a 10-bit ADC. The
//! curve is the Steinhart-Hart equation with the usual coefficients for that
//! part. Readings are passed through untouched: a disconnected thermistor yields a
//! value far outside any plausible room temperature and callers must cope.

const ADC_FULL_SCALE: f64 = 1024.0;
const SERIES_RESISTOR_OHMS: f64 = 10_000.0;
const KELVIN_OFFSET: f64 = 273.15;

const SH_A: f64 = 0.001_129_148;
const SH_B: f64 = 0.000_234_125;
const SH_C: f64 = 0.000_000_087_674_1;

pub fn temperature_c(raw: f64) -> f64 {
    let ln_r = (SERIES_RESISTOR_OHMS * (ADC_FULL_SCALE / raw - 1.0)).ln();
    let kelvin = 1.0 / (SH_A + (SH_B + SH_C * ln_r * ln_r) * ln_r);
    kelvin - KELVIN_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_reading_is_room_temperature() {
        // Equal resistances: 10 kΩ at 25 °C for this thermistor.
        let temp = temperature_c(512.0);
        assert!((temp - 25.0).abs() < 0.2, "got {temp}");
    }

    #[test]
    fn higher_reading_means_warmer_thermistor() {
        assert!(temperature_c(700.0) > temperature_c(512.0));
        assert!(temperature_c(300.0) < temperature_c(512.0));
    }

    #[test]
    fn disconnected_thermistor_is_not_clamped() {
        assert_eq!(temperature_c(0.0), -KELVIN_OFFSET);
        let shorted = temperature_c(1023.9);
        assert!(shorted > 100.0, "got {shorted}");
    }
}
