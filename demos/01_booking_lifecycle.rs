/// booking lifecycle - down payment balance, split payment, cheque, refund
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use installment_engine_rs::{
    BookingRequest, BookingTerms, ChequeDetails, DownPaymentSpec, Ledger, Money, PaymentDetails,
    PaymentMethod, PaymentRequest, PlanDraft, SafeTimeProvider, TimeSource, Uuid,
};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,installment_engine_rs=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== booking lifecycle example ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();
    let ledger = Ledger::default();

    let plan = ledger.create_plan(
        PlanDraft::new(
            "10 marla",
            Money::from_major(9_000_000),
            DownPaymentSpec::Percentage(dec!(25)),
            Money::from_major(225_000),
        )
        .with_tenure(24)
        .with_bi_yearly(Money::from_major(337_500)),
        &time,
    )?;
    println!(
        "plan {} scheduled total: {}",
        plan.id,
        plan.validated.scheduled_total()
    );

    // buyer pays 1,500,000 of the 2,250,000 down payment at sale
    let booking_id = Uuid::new_v4();
    let built = ledger.create_booking(
        BookingRequest {
            booking_id,
            total_amount: Money::from_major(9_000_000),
            down_payment_requested: Money::from_major(2_250_000),
            down_payment_paid: Money::from_major(1_500_000),
            start_date: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            terms: BookingTerms::Plan { plan_id: plan.id },
        },
        &time,
    )?;
    println!("schedule {} with {} installments", built.schedule.id, built.installments.len());
    println!("booking status: {:?}", ledger.booking(booking_id)?.status);

    // settle the down payment balance plus part of the first monthly
    controller.advance(Duration::days(20));
    ledger.record_payment(
        booking_id,
        PaymentRequest::new(Money::from_major(850_000), PaymentMethod::BankTransfer)
            .with_details(PaymentDetails::with_reference("IBFT-20240121-0042")),
        &time,
    )?;
    println!("booking status: {:?}", ledger.booking(booking_id)?.status);

    // a cheque waits for clearing before it is allocated
    let cheque = ledger.register_pending_payment(
        booking_id,
        PaymentRequest::new(Money::from_major(300_000), PaymentMethod::Cheque).with_details(
            PaymentDetails::with_cheque(ChequeDetails {
                cheque_number: "118204".to_string(),
                bank_name: "HBL".to_string(),
                cheque_date: NaiveDate::from_ymd_opt(2024, 2, 25).unwrap(),
            }),
        ),
        &time,
    )?;
    controller.advance(Duration::days(10));
    let summary = ledger.settle_pending_payment(cheque.id, &time)?;
    println!("after cheque clears: paid {} pending {}", summary.paid_amount, summary.pending_amount);

    let refund = ledger.refund_payment(cheque.id, Money::from_major(50_000), &time)?;
    println!("refunded {} against {}", refund.amount.abs(), cheque.id);

    ledger.reconcile(booking_id)?;
    println!("\n{}", ledger.view(booking_id)?.to_json_pretty()?);

    for event in ledger.take_events()? {
        println!("event: {:?}", event);
    }
    Ok(())
}
