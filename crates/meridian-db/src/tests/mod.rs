mod store_contracts;
