mod admin;
mod callbacks;
mod cashier;
mod helpers;
mod merchant_api;
mod misc;
