mod navigator;
mod translator;

pub use navigator::SongPartNavigator;
pub use translator::{LeadSheetPosition, PositionTranslator};
