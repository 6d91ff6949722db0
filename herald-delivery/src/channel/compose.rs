//! Message composition for each notification kind

use herald_common::NotificationKind;
use minijinja::{AutoEscape, Environment, context};
use serde::Serialize;

use super::{EmailBody, EmailMessage, SmsMessage};
use crate::{
    error::{DeliveryError, SystemError, TerminalError},
    types::{NotificationJob, OrderSummary, Payload},
};

const ORDER_CONFIRMATION_HTML: &str = r#"<h1>Thank you for your order!</h1>
<p>Dear {{ name }},</p>
<p>We're pleased to confirm your order #{{ order_id }} has been received.</p>
<h2>Order Details:</h2>
<ul>
{%- for item in items %}
  <li>{{ item.name }} - Quantity: {{ item.quantity }} - Price: ${{ item.price }}</li>
{%- endfor %}
</ul>
<p><strong>Total Amount: ${{ total }}</strong></p>
<p>We'll notify you when your order ships.</p>
<p>Thank you for shopping with us!</p>
"#;

const PAYMENT_CONFIRMATION_HTML: &str = r"<h1>Payment Confirmation</h1>
<p>Dear {{ name }},</p>
<p>We've received your payment for order #{{ order_id }}.</p>
<p><strong>Amount Paid: ${{ total }}</strong></p>
<p>Your order is now being processed.</p>
<p>Thank you for your business!</p>
";

const SHIPPING_CONFIRMATION_HTML: &str = r#"<h1>Your Order Has Been Shipped!</h1>
<p>Dear {{ name }},</p>
<p>Great news! Your order #{{ order_id }} has been shipped.</p>
<p>You can track your package using the following link:</p>
<p><a href="{{ tracking_url }}">Track Your Package</a></p>
<p>Thank you for your patience!</p>
"#;

#[derive(Serialize)]
struct ItemLine<'a> {
    name: &'a str,
    quantity: u32,
    price: String,
}

fn money(amount: f64) -> String {
    format!("{amount:.2}")
}

/// Renders jobs into channel messages
///
/// Every value interpolated into an email body is HTML-escaped.
#[derive(Debug)]
pub struct Composer {
    env: Environment<'static>,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

impl Composer {
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        Self { env }
    }

    /// Compose the email for `job`
    ///
    /// # Errors
    ///
    /// Returns a [`TerminalError`] if the job lacks what its kind needs, or a
    /// [`SystemError`] if rendering fails.
    pub fn email(&self, job: &NotificationJob) -> Result<EmailMessage, DeliveryError> {
        let to = recipient(job)?;

        let (subject, body) = match &job.payload {
            Payload::Content(content) => (
                content
                    .subject
                    .clone()
                    .unwrap_or_else(|| job.kind.to_string()),
                EmailBody::Text(content.body.clone()),
            ),
            Payload::Order(order) => {
                let order = order_fields(&job.kind, order)?;
                let name = job.recipient.display_name();

                let (subject, html) = match &job.kind {
                    NotificationKind::OrderConfirmation => {
                        let items: Vec<_> = order
                            .items
                            .iter()
                            .map(|item| ItemLine {
                                name: &item.name,
                                quantity: item.quantity,
                                price: money(item.price),
                            })
                            .collect();

                        (
                            format!("Order Confirmation - Order #{}", order.order_id),
                            self.render(
                                ORDER_CONFIRMATION_HTML,
                                context! {
                                    name => name,
                                    order_id => &order.order_id,
                                    items => items,
                                    total => money(order.total_amount),
                                },
                            )?,
                        )
                    }
                    NotificationKind::PaymentConfirmation => (
                        format!("Payment Confirmation - Order #{}", order.order_id),
                        self.render(
                            PAYMENT_CONFIRMATION_HTML,
                            context! {
                                name => name,
                                order_id => &order.order_id,
                                total => money(order.total_amount),
                            },
                        )?,
                    ),
                    NotificationKind::ShippingConfirmation => (
                        format!("Your Order Has Been Shipped - Order #{}", order.order_id),
                        self.render(
                            SHIPPING_CONFIRMATION_HTML,
                            context! {
                                name => name,
                                order_id => &order.order_id,
                                tracking_url => tracking_url(&job.kind, order)?,
                            },
                        )?,
                    ),
                    NotificationKind::Custom(_) => unsupported_payload(&job.kind)?,
                };

                (subject, EmailBody::Html(html))
            }
        };

        Ok(EmailMessage {
            to: to.to_string(),
            to_name: job.recipient.name.clone(),
            subject,
            body,
        })
    }

    /// Compose the SMS for `job`
    ///
    /// # Errors
    ///
    /// Returns a [`TerminalError`] if the job lacks what its kind needs.
    pub fn sms(&self, job: &NotificationJob) -> Result<SmsMessage, DeliveryError> {
        let to = recipient(job)?;

        let body = match &job.payload {
            Payload::Content(content) => content.body.clone(),
            Payload::Order(order) => {
                let order = order_fields(&job.kind, order)?;
                match &job.kind {
                    NotificationKind::OrderConfirmation => format!(
                        "Thank you for your order #{}! Total: ${}. We'll notify you when it ships.",
                        order.order_id,
                        money(order.total_amount)
                    ),
                    NotificationKind::PaymentConfirmation => format!(
                        "Payment received for order #{}. Amount: ${}.",
                        order.order_id,
                        money(order.total_amount)
                    ),
                    NotificationKind::ShippingConfirmation => format!(
                        "Your order #{} has been shipped! Track your package at: {}",
                        order.order_id,
                        tracking_url(&job.kind, order)?
                    ),
                    NotificationKind::Custom(_) => unsupported_payload(&job.kind)?,
                }
            }
        };

        Ok(SmsMessage {
            to: to.to_string(),
            body,
        })
    }

    fn render(&self, template: &str, ctx: minijinja::Value) -> Result<String, DeliveryError> {
        self.env.render_str(template, ctx).map_err(|err| {
            SystemError::Internal(format!("failed to render email template: {err}")).into()
        })
    }
}

fn recipient(job: &NotificationJob) -> Result<&str, DeliveryError> {
    let address = job.recipient.address.trim();
    if address.is_empty() {
        return Err(TerminalError::MissingRecipient.into());
    }
    Ok(address)
}

fn order_fields<'a>(
    kind: &NotificationKind,
    order: &'a OrderSummary,
) -> Result<&'a OrderSummary, DeliveryError> {
    if !kind.needs_order() {
        return unsupported_payload(kind);
    }

    if order.order_id.trim().is_empty() {
        return Err(TerminalError::MissingField {
            kind: kind.label().to_string(),
            field: "order_id",
        }
        .into());
    }

    Ok(order)
}

fn tracking_url<'a>(
    kind: &NotificationKind,
    order: &'a OrderSummary,
) -> Result<&'a str, DeliveryError> {
    order
        .tracking_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            TerminalError::MissingField {
                kind: kind.label().to_string(),
                field: "tracking_url",
            }
            .into()
        })
}

/// Custom kinds have no template to render an order through
fn unsupported_payload<T>(kind: &NotificationKind) -> Result<T, DeliveryError> {
    Err(TerminalError::UnsupportedPayload {
        kind: kind.label().to_string(),
    }
    .into())
}
