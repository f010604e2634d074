// Background removal for car photos
// Flood fill erasing and lasso cropping both run on the undo-aware canvas

pub mod canvas;
pub mod flood_fill;
pub mod lasso;
pub mod pipeline;

pub use canvas::SegmentationCanvas;
pub use flood_fill::flood_erase;
pub use lasso::{LassoPoint, lasso_cut, parse_lasso, polygon_contains};
pub use pipeline::{decode_and_scale, decode_png_data_url, encode_png_data_url};
