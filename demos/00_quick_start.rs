/// quick start - validate a plan, open a booking, take one payment
use installment_engine_rs::{
    BookingRequest, BookingTerms, DownPaymentSpec, Ledger, Money, PaymentMethod, PaymentRequest,
    PlanDraft, SafeTimeProvider, TimeSource, Uuid,
};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::System);
    let ledger = Ledger::default();

    // 5 marla plot, 20% down, 24 monthly installments
    let plan = ledger.create_plan(
        PlanDraft::new(
            "5 marla",
            Money::from_major(5_000_000),
            DownPaymentSpec::Percentage(dec!(20)),
            Money::from_major(166_667),
        )
        .with_tenure(24),
        &time,
    )?;

    let booking_id = Uuid::new_v4();
    ledger.create_booking(
        BookingRequest {
            booking_id,
            total_amount: Money::from_major(5_000_000),
            down_payment_requested: Money::from_major(1_000_000),
            down_payment_paid: Money::from_major(1_000_000),
            start_date: None,
            terms: BookingTerms::Plan { plan_id: plan.id },
        },
        &time,
    )?;

    let summary = ledger.record_payment(
        booking_id,
        PaymentRequest::new(Money::from_major(166_667), PaymentMethod::Cash),
        &time,
    )?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
