mod middleware;

pub use middleware::{BearerAuth, RequireBearer};
