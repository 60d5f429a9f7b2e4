//! Application constants
//!
//! Header names, routes and dependency names shared by the API server
//! and its clients.

// Rate-limit response headers
pub const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Identifies the caller for rate limiting
pub const HEADER_CLIENT_ID: &str = "x-client-id";
/// Identity used when no client id is sent
pub const ANONYMOUS_CLIENT: &str = "anonymous";

// Dependencies guarded by circuit breakers
pub const DEPENDENCY_IMAGE_GEN: &str = "image-gen";
pub const DEPENDENCY_STORY_GEN: &str = "story-gen";

// Routes
pub const ROUTE_GENERATE_IMAGE: &str = "/api/generate/image";
pub const ROUTE_GENERATE_STORY: &str = "/api/generate/story";
pub const ROUTE_DEPENDENCY_HEALTH: &str = "/api/health/dependencies";

// Input limits
pub const MAX_PROMPT_LENGTH: usize = 2000;
pub const MAX_CHARACTER_NAME_LENGTH: usize = 80;
