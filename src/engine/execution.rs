use crate::data::{Bar, BarTable};
use crate::engine::order::{Fill, Order, OrderSide, OrderStatus, OrderType, TimeInForce};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

//cost and liquidity settings applied to every fill
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionCosts {
    pub commission_rate: f64,
    pub slippage_rate: f64,
    //max share of a bar's volume one order may take; None = unlimited
    pub max_volume_participation: Option<f64>,
}

impl Default for ExecutionCosts {
    fn default() -> Self {
        ExecutionCosts {
            commission_rate: 0.001,
            slippage_rate: 0.0005,
            max_volume_participation: None,
        }
    }
}

impl ExecutionCosts {
    pub fn commission(&self, price: f64, qty: f64) -> f64 {
        (price * qty * self.commission_rate).abs()
    }
}

//what happened to the book on one bar
#[derive(Debug, Default)]
pub struct BarExecution {
    pub fills: Vec<Fill>,
    //orders that reached a terminal status on this bar
    pub completed: Vec<Order>,
    //ids of orders the fill guard refused, in full or in part
    pub refused: Vec<u64>,
}

//holds working orders and simulates their fills bar by bar
pub struct OrderProcessor {
    next_order_id: u64,
    next_fill_id: u64,
    pending_orders: Vec<Order>,
    costs: ExecutionCosts,
}

impl OrderProcessor {
    pub fn new(costs: ExecutionCosts) -> Self {
        OrderProcessor {
            next_order_id: 1,
            next_fill_id: 1,
            pending_orders: Vec::new(),
            costs,
        }
    }

    //hands out the next order id
    pub fn next_order_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    //queues an order for the next bar
    //malformed orders come back rejected instead of being queued
    pub fn submit(&mut self, mut order: Order) -> Result<u64, Order> {
        if let Err(reason) = order.validate() {
            warn!(order_id = order.id, %reason, "order rejected");
            order.reject(reason);
            return Err(order);
        }
        let id = order.id;
        self.pending_orders.push(order);
        Ok(id)
    }

    //evaluates all working orders against the bars of one timestamp
    //
    //`guard(order, qty)` returns how much of a triggered fill the book accepts;
    //an order it cuts short is cancelled with the rest unfilled
    pub fn process_bar<G>(
        &mut self,
        bars: &BarTable,
        timestamp: DateTime<Utc>,
        mut guard: G,
    ) -> BarExecution
    where
        G: FnMut(&Order, f64) -> f64,
    {
        let mut execution = BarExecution::default();
        let mut orders_to_keep = Vec::new();

        for mut order in std::mem::take(&mut self.pending_orders) {
            if let TimeInForce::Gtd(expiry) = order.time_in_force {
                if timestamp > expiry {
                    debug!(order_id = order.id, "order expired");
                    self.finish(order, OrderStatus::Cancelled, &mut execution);
                    continue;
                }
            }

            //no bar for this symbol yet: keep working
            let Some(bar) = bars.get(&order.symbol) else {
                orders_to_keep.push(order);
                continue;
            };

            if let Some(raw_price) = fill_price(&mut order, bar) {
                let wanted = self.fillable(&order, bar);
                let accepted = guard(&order, wanted).clamp(0.0, wanted);
                if accepted > 0.0 {
                    if let Some(fill) = self.fill(&mut order, raw_price, accepted, timestamp) {
                        execution.fills.push(fill);
                    }
                }
                if accepted < wanted - 1e-9 {
                    warn!(order_id = order.id, refused = wanted - accepted, "fill refused");
                    execution.refused.push(order.id);
                    refuse(&mut order);
                    execution.completed.push(order);
                    continue;
                }
            }

            if order.status == OrderStatus::Filled {
                execution.completed.push(order);
            } else if order.time_in_force == TimeInForce::Ioc {
                self.finish(order, OrderStatus::Cancelled, &mut execution);
            } else {
                orders_to_keep.push(order);
            }
        }

        self.pending_orders = orders_to_keep;
        execution
    }

    //quantity the bar's volume allows for this order
    fn fillable(&self, order: &Order, bar: &Bar) -> f64 {
        match self.costs.max_volume_participation {
            Some(participation) => order.remaining().min(bar.volume * participation),
            None => order.remaining(),
        }
        .max(0.0)
    }

    //applies slippage and commission to a triggered order
    fn fill(
        &mut self,
        order: &mut Order,
        raw_price: f64,
        qty: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<Fill> {

        let price = order.side.adverse(raw_price, self.costs.slippage_rate);
        let slippage = (price - raw_price).abs() * qty;
        let commission = self.costs.commission(price, qty);

        if let Err(e) = order.record_fill(qty, price, commission, slippage, timestamp) {
            warn!("fill not booked: {}", e);
            return None;
        }

        let fill = Fill {
            id: self.next_fill_id,
            order_id: order.id,
            timestamp,
            symbol: order.symbol.clone(),
            side: order.side,
            qty,
            price,
            commission,
            slippage,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
        };
        self.next_fill_id += 1;

        debug!(
            order_id = order.id,
            symbol = %fill.symbol,
            qty = fill.qty,
            price = fill.price,
            "order filled"
        );
        Some(fill)
    }

    fn finish(&self, mut order: Order, status: OrderStatus, execution: &mut BarExecution) {
        if let Err(e) = order.transition(status) {
            warn!("{}", e);
        }
        execution.completed.push(order);
    }

    //signed remaining quantity of market orders queued for a symbol
    //
    //market orders fill on the next bar, so this is exposure already committed
    pub fn queued_quantity(&self, symbol: &str) -> f64 {
        self.pending_orders
            .iter()
            .filter(|o| o.symbol == symbol && o.order_type == OrderType::Market)
            .map(|o| o.side.sign() * o.remaining())
            .sum()
    }

    pub fn pending_orders(&self) -> &[Order] {
        &self.pending_orders
    }

    //cancels all pending orders and returns them
    pub fn cancel_all_orders(&mut self) -> Vec<Order> {
        cancel(std::mem::take(&mut self.pending_orders))
    }
}

//ends an order the book would not take
fn refuse(order: &mut Order) {
    let reason = "fill refused: no position left to reduce";
    if order.status == OrderStatus::Pending {
        order.reject(reason);
    } else if order.transition(OrderStatus::Cancelled).is_ok() {
        order.reject_reason = Some(reason.to_string());
    }
}

fn cancel(orders: Vec<Order>) -> Vec<Order> {
    orders
        .into_iter()
        .map(|mut o| {
            if let Err(e) = o.transition(OrderStatus::Cancelled) {
                warn!("{}", e);
            }
            o
        })
        .collect()
}

//raw (pre-slippage) fill price if the order executes on this bar
//
//limits fill at the better of (limit, open); stops at the worse of (stop, open)
fn fill_price(order: &mut Order, bar: &Bar) -> Option<f64> {
    match order.order_type {
        OrderType::Market => Some(bar.open),
        OrderType::Limit => limit_fill(order.side, order.limit_price?, bar),
        OrderType::Stop => stop_fill(order.side, order.stop_price?, bar),
        OrderType::StopLimit => {
            let limit = order.limit_price?;
            if order.triggered {
                return limit_fill(order.side, limit, bar);
            }
            let trigger = stop_fill(order.side, order.stop_price?, bar)?;
            order.triggered = true;
            let marketable = match order.side {
                OrderSide::Buy => trigger <= limit,
                OrderSide::Sell => trigger >= limit,
            };
            marketable.then_some(trigger)
        }
        OrderType::TrailingStop => {
            let trail = order.trail?;
            let reference = *order.trail_reference.get_or_insert(bar.open);
            let stop = trail.stop_from(reference, order.side);
            order.stop_price = Some(stop);

            if let Some(price) = stop_fill(order.side, stop, bar) {
                return Some(price);
            }

            //ratchet the reference toward the favorable extreme
            let next = match order.side {
                OrderSide::Sell => reference.max(bar.high),
                OrderSide::Buy => reference.min(bar.low),
            };
            order.trail_reference = Some(next);
            order.stop_price = Some(trail.stop_from(next, order.side));
            None
        }
    }
}

fn limit_fill(side: OrderSide, limit: f64, bar: &Bar) -> Option<f64> {
    match side {
        OrderSide::Buy if bar.low <= limit => Some(limit.min(bar.open)),
        OrderSide::Sell if bar.high >= limit => Some(limit.max(bar.open)),
        _ => None,
    }
}

fn stop_fill(side: OrderSide, stop: f64, bar: &Bar) -> Option<f64> {
    match side {
        OrderSide::Buy if bar.high >= stop => Some(stop.max(bar.open)),
        OrderSide::Sell if bar.low <= stop => Some(stop.min(bar.open)),
        _ => None,
    }
}
