mod handler;
mod model;

pub use handler::{
    activity_bookings, batch_bookings, book_activity, booking_detail, booking_statistics, cancel_booking,
    delete_booking, my_bookings, update_booking_status,
};
pub use model::{
    BatchOperation, BatchRequest, BatchResult, Booking, BookingDecision, BookingStatistics, BookingStatus,
    MyBookingsQuery, TotalScope, UpdateBookingStatusRequest, account_of, attendance_rate, decide_booking, round_to,
};
