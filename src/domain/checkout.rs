use {
    super::error::PipelineError,
    super::id::OrderRef,
    super::ledger::BoxFuture,
    super::money::MoneyAmount,
    serde::Serialize,
};

const MAX_LINE_ITEMS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    name: String,
    amount: MoneyAmount,
    quantity: u32,
}

impl LineItem {
    pub fn new(name: impl Into<String>, amount: i64, quantity: u32) -> Result<Self, PipelineError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::Validation("line item name is empty".into()));
        }
        let amount = MoneyAmount::new(amount)?;
        if amount.cents() == 0 {
            return Err(PipelineError::Validation(format!(
                "line item {name} has zero amount"
            )));
        }
        if quantity == 0 {
            return Err(PipelineError::Validation(format!(
                "line item {name} has zero quantity"
            )));
        }
        Ok(Self {
            name,
            amount,
            quantity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    order_id: Option<OrderRef>,
    items: Vec<LineItem>,
    total: MoneyAmount,
}

impl CheckoutRequest {
    pub fn new(order_id: Option<OrderRef>, items: Vec<LineItem>) -> Result<Self, PipelineError> {
        if items.is_empty() {
            return Err(PipelineError::Validation("checkout needs at least one item".into()));
        }
        if items.len() > MAX_LINE_ITEMS {
            return Err(PipelineError::Validation(format!(
                "checkout accepts at most {MAX_LINE_ITEMS} items"
            )));
        }
        let total = items
            .iter()
            .try_fold(MoneyAmount::zero(), |acc, item| {
                item.amount
                    .checked_mul(item.quantity)
                    .and_then(|line| acc.checked_add(line))
            })
            .ok_or_else(|| PipelineError::Validation("checkout total overflows".into()))?;

        Ok(Self {
            order_id,
            items,
            total,
        })
    }

    pub fn order_id(&self) -> Option<&OrderRef> {
        self.order_id.as_ref()
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn total(&self) -> MoneyAmount {
        self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

pub trait CheckoutGateway: Send + Sync {
    fn create_session<'a>(
        &'a self,
        request: &'a CheckoutRequest,
    ) -> BoxFuture<'a, Result<CheckoutSession, PipelineError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_item_validation() {
        assert!(LineItem::new("Dune", 1299, 1).is_ok());
        assert!(LineItem::new("", 1299, 1).is_err());
        assert!(LineItem::new("Dune", 0, 1).is_err());
        assert!(LineItem::new("Dune", -5, 1).is_err());
        assert!(LineItem::new("Dune", 1299, 0).is_err());
    }

    #[test]
    fn total_sums_amount_times_quantity() {
        let req = CheckoutRequest::new(
            None,
            vec![
                LineItem::new("Dune", 1299, 2).unwrap(),
                LineItem::new("Wired, March", 599, 1).unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(req.total().cents(), 1299 * 2 + 599);
    }

    #[test]
    fn rejects_empty_and_overflowing_carts() {
        assert!(CheckoutRequest::new(None, vec![]).is_err());
        let huge = LineItem::new("Everything", i64::MAX, 2).unwrap();
        assert!(CheckoutRequest::new(None, vec![huge]).is_err());
    }
}
