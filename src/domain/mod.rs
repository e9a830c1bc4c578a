// Domain layer: models and the collaborator ports the workflow is written against.

pub mod model;
pub mod ports;
