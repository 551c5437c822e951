/// late fees - overdue sweep with controlled time
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use installment_engine_rs::{
    BookingRequest, BookingTerms, EngineConfig, Ledger, Money, PaymentMethod, PaymentRequest,
    PaymentType, Rate, SafeTimeProvider, TimeSource, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== late fee example ===\n");

    let config = EngineConfig::from_json(r#"{ "late_fee": { "monthly_rate": "0.02", "days_per_month": 30 } }"#)?;
    let ledger = Ledger::new(config)?;

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();

    let mut bookings = Vec::new();
    for _ in 0..3 {
        let booking_id = Uuid::new_v4();
        ledger.create_booking(
            BookingRequest {
                booking_id,
                total_amount: Money::from_major(500_000),
                down_payment_requested: Money::from_major(100_000),
                down_payment_paid: Money::from_major(100_000),
                start_date: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
                terms: BookingTerms::AdHoc {
                    payment_type: PaymentType::Installments,
                    installment_count: 4,
                },
            },
            &time,
        )?;
        bookings.push(booking_id);
    }

    // one buyer pays on time, one gets a higher rate
    ledger.record_payment(
        bookings[0],
        PaymentRequest::new(Money::from_major(100_000), PaymentMethod::Cash),
        &time,
    )?;
    ledger.set_late_fee_rate(bookings[2], Rate::from_percentage(3), &time)?;

    controller.advance(Duration::days(46));
    println!("sweep as of {}", time.now().format("%Y-%m-%d"));

    let sweep = ledger.run_overdue_sweep(&time);
    println!("schedules processed: {}", sweep.schedules_processed);
    println!("installments marked overdue: {}", sweep.installments_marked_overdue);
    println!("total late fees accrued: {}", sweep.total_late_fees_accrued);

    for booking_id in &bookings {
        let schedule = ledger.active_schedule(*booking_id)?;
        println!(
            "booking {}: pending {} late fees {} (rate {})",
            booking_id, schedule.pending_amount, schedule.total_late_fees, schedule.late_fee_rate
        );
    }
    Ok(())
}
