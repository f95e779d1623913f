use crate::{config::ControllerConfig, types::Indicator};

/// Picks the indicator band for a temperature. No hysteresis: a reading that
/// sits on a threshold may alternate between bands from one call to the next.
pub fn classify(temp_c: f64, config: &ControllerConfig) -> Indicator {
    if temp_c >= config.hot_threshold_c {
        Indicator::Hot
    } else if temp_c <= config.cold_threshold_c {
        Indicator::Cold
    } else {
        Indicator::Normal
    }
}

/// The three indicator outputs as they should be driven for `active`:
/// exactly one entry is `true`.
pub fn indicator_levels(active: Indicator) -> [(Indicator, bool); 3] {
    Indicator::ALL.map(|kind| (kind, kind == active))
}
