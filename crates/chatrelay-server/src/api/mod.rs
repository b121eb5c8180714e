pub mod conversations;
pub mod relay;
pub mod response;
pub mod state;

pub use response::ApiResponse;
