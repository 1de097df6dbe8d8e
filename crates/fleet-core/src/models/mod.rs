//! Local entity types persisted by the store.

mod device;
mod device_model;

pub use device::{Device, DeviceClass, DeviceTag, Label};
pub use device_model::DeviceModel;
