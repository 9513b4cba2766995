/*
[INPUT]:  Payload definitions shared by all exchange adapters
[OUTPUT]: Unified type exports
[POS]:    Data layer - public type surface
[UPDATE]: When adding new type modules
*/

pub mod enums;
pub mod models;

pub use enums::*;
pub use models::*;
