use serde::Serialize;

/// Growth stage shown in the garden view, derived purely from a completion
/// percentage. Every percentage maps to exactly one stage; boundaries are
/// closed downward except the zero case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GrowthStage {
    Seed,
    Seedling,
    Sprout,
    Blooming,
}

impl GrowthStage {
    /// Out-of-range input clamps to `[0, 100]`; NaN falls through to `Seed`.
    pub fn classify(pct: f64) -> Self {
        let pct = pct.clamp(0.0, 100.0);
        if pct >= 90.0 {
            GrowthStage::Blooming
        } else if pct >= 60.0 {
            GrowthStage::Sprout
        } else if pct > 0.0 {
            GrowthStage::Seedling
        } else {
            GrowthStage::Seed
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GrowthStage::Seed => "Seed",
            GrowthStage::Seedling => "Seedling",
            GrowthStage::Sprout => "Sprout",
            GrowthStage::Blooming => "Blooming",
        }
    }

    /// Display tier for the garden view, lowest to highest.
    pub fn tier(&self) -> u8 {
        match self {
            GrowthStage::Seed => 0,
            GrowthStage::Seedling => 1,
            GrowthStage::Sprout => 2,
            GrowthStage::Blooming => 3,
        }
    }
}
