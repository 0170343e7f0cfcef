// Export components
pub mod calendar;
pub mod ics;

// Re-export the calendar service
pub use calendar::CalendarService;
