pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    dim, error, header, info, muted, record_deleted, record_new, section, status, success,
    summary_row, warn,
};
pub use table::{
    generators_table, models_table, predictions_table, sources_table, stats_table, TableBuilder,
};
pub use theme::{theme, Theme};
