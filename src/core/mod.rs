pub mod home;
pub mod live;

// Re-export commonly used types for convenience
pub use home::{
    ControlPlane, ControlPlaneError, EntityDirectory, EntityState, HomeAssistantClient,
    HomeAssistantConfig, ServiceCall,
};

pub use live::{
    AudioDevices, DisconnectReason, GeminiLiveTransport, LiveConfig, LiveError, LiveResult,
    LiveTransport, SessionEvent, SessionManager, SessionState,
};
