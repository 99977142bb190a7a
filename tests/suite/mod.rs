mod backoff;
mod contexts;
mod offline_flow;
mod persistence;
mod reconcile;
