//! External data seam: the terrain model queried by the correction stages

pub mod dem;

pub use dem::TerrainModel;
