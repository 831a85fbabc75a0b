#![allow(dead_code)]

pub mod chc_util;
