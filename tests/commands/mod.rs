mod test_harvest;
